use std::env;
use std::str::FromStr;

/// When the collector runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcPolicy {
    /// Collect after every evaluation step.
    Always,
    /// Collect only once the live footprint exceeds a byte limit. The limit
    /// doubles whenever a collection leaves the footprint above it.
    Threshold { initial_bytes: usize },
}

pub const DEFAULT_THRESHOLD_BYTES: usize = 1 << 20;

/// Deep enough for ordinary recursion while staying inside a 2 MiB thread
/// stack in unoptimized builds. Hosts with bigger stacks raise it.
pub const DEFAULT_MAX_DEPTH: usize = 512;

impl FromStr for GcPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(GcPolicy::Always),
            "threshold" => Ok(GcPolicy::Threshold {
                initial_bytes: DEFAULT_THRESHOLD_BYTES,
            }),
            other => Err(format!(
                "unknown gc policy '{}' (expected 'always' or 'threshold')",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MachineConfig {
    pub gc_policy: GcPolicy,
    /// Maximum live objects per registry.
    pub heap_capacity: usize,
    /// Maximum frame-stack depth before evaluation yields an error value.
    pub max_depth: usize,
    pub random_seed: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            gc_policy: GcPolicy::Always,
            heap_capacity: 10_000_000,
            max_depth: DEFAULT_MAX_DEPTH,
            random_seed: None,
        }
    }
}

impl MachineConfig {
    /// Defaults overridden by `MSCHEME_GC`, `MSCHEME_GC_THRESHOLD` and
    /// `MSCHEME_MAX_DEPTH`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = MachineConfig::default();

        if let Some(policy) = parse_var::<GcPolicy>("MSCHEME_GC") {
            config.gc_policy = policy;
        }
        if let Some(bytes) = parse_var::<usize>("MSCHEME_GC_THRESHOLD") {
            config.gc_policy = GcPolicy::Threshold {
                initial_bytes: bytes,
            };
        }
        if let Some(depth) = parse_var::<usize>("MSCHEME_MAX_DEPTH") {
            config.max_depth = depth;
        }
        config
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing() {
        assert_eq!("always".parse::<GcPolicy>(), Ok(GcPolicy::Always));
        assert_eq!(
            "threshold".parse::<GcPolicy>(),
            Ok(GcPolicy::Threshold {
                initial_bytes: DEFAULT_THRESHOLD_BYTES
            })
        );
        assert!("sometimes".parse::<GcPolicy>().is_err());
    }

    #[test]
    fn defaults_collect_every_step() {
        let config = MachineConfig::default();
        assert_eq!(config.gc_policy, GcPolicy::Always);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.random_seed.is_none());
    }
}
