use std::sync::LazyLock;

use demux_bus::DemuxOptions;

pub struct TapConfig {
    start_with_keyframe: bool,
    copy_ts: bool,
    queue_capacity: usize,
}

impl TapConfig {
    fn from_env() -> Self {
        Self {
            start_with_keyframe: env_flag("PACKET_TAP_KEYFRAME"),
            copy_ts: env_flag("PACKET_TAP_COPYTS"),
            queue_capacity: std::env::var("PACKET_TAP_QUEUE")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(demux_bus::options::DEFAULT_QUEUE_CAPACITY),
        }
    }

    pub fn demux_options(&self) -> DemuxOptions {
        DemuxOptions::builder()
            .start_with_keyframe(self.start_with_keyframe)
            .copy_ts(self.copy_ts)
            .queue_capacity(self.queue_capacity)
            .build()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn config() -> &'static TapConfig {
    static CONFIG: LazyLock<TapConfig> = LazyLock::new(TapConfig::from_env);
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("on"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_demux_options() {
        let config = TapConfig {
            start_with_keyframe: true,
            copy_ts: false,
            queue_capacity: 0,
        };
        let options = config.demux_options();
        assert!(options.start_with_keyframe);
        assert!(!options.copy_ts);
        assert_eq!(options.queue_capacity, 1);
    }
}
