//! Unified event stream for the source
//!
//! Everything the host observes about a source (lifecycle, the achieved
//! sample rate, clamp warnings, errors) arrives through one broadcast
//! channel, keeping observation decoupled from the command path.

/// Events emitted by the source actor
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// Streaming began; carries the achieved sample rate
    Started {
        /// Achieved output rate in Hz, as queried from the hardware
        sample_rate_hz: f64,
    },

    /// Streaming ended (explicit stop or fatal stream error)
    Stopped,

    /// The achieved sample rate changed (after start or a cold
    /// reconfiguration); the host signal path must retune to this
    SampleRateChanged {
        /// Achieved output rate in Hz
        sample_rate_hz: f64,
    },

    /// A bandwidth request was outside the valid range for the selected
    /// decimation and the nearest bound was applied instead
    BandwidthClamped {
        /// What the caller asked for, in Hz
        requested_hz: f64,
        /// What was applied, in Hz
        applied_hz: f64,
    },

    /// A non-fatal condition worth surfacing
    Warning {
        /// Description of the condition
        message: String,
    },

    /// A failure that stopped the in-progress operation
    Error {
        /// Which operation failed
        source: String,
        /// Description of the failure
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_cloneable_for_broadcast() {
        let event = SourceEvent::BandwidthClamped {
            requested_hz: 50.0,
            applied_hz: 200.0,
        };
        let copy = event.clone();
        assert!(matches!(
            copy,
            SourceEvent::BandwidthClamped { applied_hz, .. } if applied_hz == 200.0
        ));
    }
}
