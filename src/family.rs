//! Reader models and RF profile adaptation rules
//!
//! Both tables are configuration data: the thresholds come from vendor
//! tuning and can be replaced per session through `OrchestratorConfig`.

/// Reader families that differ in how continuous inventory is tuned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderFamily {
    /// Fixed link profile, no adaptation
    Standard,
    /// RRUx180 series
    Rru1x80,
    /// Impinj E710 based readers
    Ex10,
}

impl ReaderFamily {
    pub fn adapts_profile(self) -> bool {
        !matches!(self, ReaderFamily::Standard)
    }

    /// Profile the reader is expected to boot with
    pub fn baseline_profile(self) -> u8 {
        match self {
            ReaderFamily::Standard => 0,
            ReaderFamily::Rru1x80 | ReaderFamily::Ex10 => 13,
        }
    }

    /// Default adaptation table; empty for families without profiles
    pub fn default_rules(self) -> &'static [ProfileRule] {
        match self {
            ReaderFamily::Standard => &[],
            ReaderFamily::Rru1x80 => RRU1X80_RULES,
            ReaderFamily::Ex10 => EX10_RULES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderModel {
    pub reader_type: u8,
    pub name: &'static str,
    pub antenna_count: u8,
    pub family: ReaderFamily,
}

const fn model(reader_type: u8, name: &'static str, antenna_count: u8, family: ReaderFamily) -> ReaderModel {
    ReaderModel {
        reader_type,
        name,
        antenna_count,
        family,
    }
}

static MODELS: &[ReaderModel] = &[
    model(0x60, "UHF5101", 1, ReaderFamily::Standard),
    model(0x61, "UHF5104", 4, ReaderFamily::Standard),
    model(0x62, "UHF5108", 8, ReaderFamily::Standard),
    model(0x70, "RRU1180", 1, ReaderFamily::Rru1x80),
    model(0x71, "RRU4180", 4, ReaderFamily::Rru1x80),
    model(0x72, "RRU8180", 8, ReaderFamily::Rru1x80),
    model(0x73, "RRU16180", 16, ReaderFamily::Rru1x80),
    model(0xA0, "E710-1", 1, ReaderFamily::Ex10),
    model(0xA1, "E710-4", 4, ReaderFamily::Ex10),
    model(0xA2, "E710-8", 8, ReaderFamily::Ex10),
    model(0xA3, "E710-16", 16, ReaderFamily::Ex10),
];

/// Every known model
pub fn models() -> &'static [ReaderModel] {
    MODELS
}

/// Resolve the reader-type byte from the info reply. Unknown types are
/// treated as a generic four-port reader without profile adaptation.
pub fn lookup_model(reader_type: u8) -> ReaderModel {
    MODELS
        .iter()
        .find(|m| m.reader_type == reader_type)
        .copied()
        .unwrap_or(model(reader_type, "Unknown", 4, ReaderFamily::Standard))
}

/// What one inventory call looked like, as seen by the adaptation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleMetrics {
    pub tag_count: u32,
    /// Tags per second over the call
    pub tag_rate: u32,
    pub idle_cycles: u32,
}

impl CycleMetrics {
    pub fn new(tag_count: u32, elapsed_ms: u64, idle_cycles: u32) -> Self {
        let tag_rate = if elapsed_ms == 0 {
            tag_count.saturating_mul(1000)
        } else {
            ((tag_count as u64 * 1000) / elapsed_ms).min(u32::MAX as u64) as u32
        };
        Self {
            tag_count,
            tag_rate,
            idle_cycles,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileTrigger {
    /// Busy field: switch to a faster profile
    Dense { min_rate: u32, min_count: u32 },
    /// Few tags left: fall back to a more robust profile
    Sparse { max_rate: u32 },
    /// Nothing answered for a while; also flips the target
    Idle { cycles: u32 },
}

impl ProfileTrigger {
    pub fn matches(&self, metrics: &CycleMetrics) -> bool {
        match *self {
            ProfileTrigger::Dense {
                min_rate,
                min_count,
            } => metrics.tag_rate >= min_rate && metrics.tag_count >= min_count,
            ProfileTrigger::Sparse { max_rate } => {
                metrics.tag_count > 0 && metrics.tag_rate < max_rate
            }
            ProfileTrigger::Idle { cycles } => metrics.idle_cycles >= cycles,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileRule {
    pub from: u8,
    pub trigger: ProfileTrigger,
    pub to: u8,
}

const fn rule(from: u8, trigger: ProfileTrigger, to: u8) -> ProfileRule {
    ProfileRule { from, trigger, to }
}

const fn dense(min_rate: u32, min_count: u32) -> ProfileTrigger {
    ProfileTrigger::Dense {
        min_rate,
        min_count,
    }
}

static RRU1X80_RULES: &[ProfileRule] = &[
    rule(13, dense(20, 4), 5),
    rule(5, dense(60, 12), 1),
    rule(1, ProfileTrigger::Sparse { max_rate: 20 }, 5),
    rule(5, ProfileTrigger::Idle { cycles: 3 }, 13),
    rule(1, ProfileTrigger::Idle { cycles: 3 }, 13),
];

static EX10_RULES: &[ProfileRule] = &[
    rule(13, dense(15, 3), 3),
    rule(3, dense(50, 10), 1),
    rule(1, dense(120, 25), 11),
    rule(11, ProfileTrigger::Sparse { max_rate: 60 }, 1),
    rule(1, ProfileTrigger::Sparse { max_rate: 20 }, 3),
    rule(3, ProfileTrigger::Idle { cycles: 3 }, 13),
    rule(1, ProfileTrigger::Idle { cycles: 3 }, 13),
    rule(11, ProfileTrigger::Idle { cycles: 3 }, 13),
];

/// First rule for `current` whose trigger fires, if any
pub fn next_profile<'a>(
    rules: &'a [ProfileRule],
    current: u8,
    metrics: &CycleMetrics,
) -> Option<&'a ProfileRule> {
    rules
        .iter()
        .find(|r| r.from == current && r.trigger.matches(metrics))
}
