//! Mixer channel: input buffer → resample → DSP chain → output
//! buffer, owned exclusively by the device that installed it.

use super::dsp::DspChain;
use super::{resample_point, AudioSpec, Category};

/// `generate(time_span_ns, prebuffering, first_update) -> active?`.
/// Implemented by the device that owns the channel; pushes produced frames
/// into the channel's input buffer via `push_input` and returns whether it
/// still has anything to produce.
pub type GenerateCallback = Box<dyn FnMut(u64, bool, bool) -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub active: bool,
    pub enabled: bool,
}

pub struct MixerChannel {
    pub id: u64,
    pub name: String,
    pub category: Category,
    pub input_spec: AudioSpec,
    pub output_spec: AudioSpec,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
    pub dsp: DspChain,
    pub enabled: bool,
    pub mute: bool,
    pub force_mute: bool,
    active: bool,
    disable_deadline_ns: Option<u64>,
    /// Disable timeout: how long after the generator stops producing before
    /// the channel deactivates and clears its buffers.
    pub disable_timeout_ns: u64,
    generate_cb: Option<GenerateCallback>,
}

impl MixerChannel {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        category: Category,
        input_spec: AudioSpec,
        output_spec: AudioSpec,
    ) -> Self {
        MixerChannel {
            id,
            name: name.into(),
            category,
            input_spec,
            output_spec,
            input_buffer: Vec::new(),
            output_buffer: Vec::new(),
            dsp: DspChain::new(output_spec.rate_hz),
            enabled: true,
            mute: false,
            force_mute: false,
            active: false,
            disable_deadline_ns: None,
            // A few ms after the generator goes quiet, matching the
            // "a few ms after the last non-silence input" default.
            disable_timeout_ns: 20_000_000,
            generate_cb: None,
        }
    }

    pub fn set_generator(&mut self, cb: GenerateCallback) {
        self.generate_cb = Some(cb);
    }

    /// Appends interleaved frames (in `input_spec`) produced by the device's
    /// generate callback for this update.
    pub fn push_input(&mut self, frames: &[f32]) {
        self.input_buffer.extend_from_slice(frames);
    }

    /// Drops all pending input/output frames under the channel's (implicit,
    /// single-owner) critical section.
    pub fn flush(&mut self) {
        self.input_buffer.clear();
        self.output_buffer.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Drains the resampled+DSP'd output buffer, consuming up to
    /// `max_frames` stereo frames (or fewer if not enough data is queued).
    pub fn take_output(&mut self, max_frames: usize) -> Vec<f32> {
        let channels = self.output_spec.channels as usize;
        let avail_frames = self.output_buffer.len() / channels;
        let take_frames = avail_frames.min(max_frames);
        let take_len = take_frames * channels;
        self.output_buffer.drain(0..take_len).collect()
    }

    /// Invokes the generate callback for `time_span_ns`, resamples whatever
    /// landed in the input buffer into the output spec, runs the DSP chain,
    /// and appends to the output buffer. Returns the channel's new status.
    pub fn update(&mut self, now_ns: u64, time_span_ns: u64, prebuffering: bool) -> ChannelStatus {
        if !self.enabled {
            return ChannelStatus { active: self.active, enabled: false };
        }

        let first_update = self.disable_deadline_ns.is_none() && !self.active;
        let mut producing = false;
        if let Some(cb) = self.generate_cb.as_mut() {
            producing = cb(time_span_ns, prebuffering, first_update);
        }

        if producing {
            self.active = true;
            self.disable_deadline_ns = None;
        } else if self.active && self.disable_deadline_ns.is_none() {
            self.disable_deadline_ns = Some(now_ns + self.disable_timeout_ns);
        }

        if !self.input_buffer.is_empty() {
            let mut resampled = resample_point(&self.input_buffer, self.input_spec, self.output_spec);
            self.input_buffer.clear();
            self.dsp.process_buffer(&mut resampled);
            self.output_buffer.append(&mut resampled);
        }

        if let Some(deadline) = self.disable_deadline_ns {
            if now_ns >= deadline {
                self.active = false;
                self.disable_deadline_ns = None;
                self.flush();
            }
        }

        ChannelStatus { active: self.active, enabled: self.enabled }
    }

    /// Effective mute: explicit mute OR a force-mute applied by the mixer
    /// (e.g. during a config-change barrier).
    pub fn is_muted(&self) -> bool {
        self.mute || self.force_mute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AudioSpec {
        AudioSpec::new(2, 48_000)
    }

    #[test]
    fn channel_activates_while_generator_produces() {
        let mut ch = MixerChannel::new(1, "test", Category::SoundFX, spec(), spec());
        ch.set_generator(Box::new(|_span, _pre, _first| true));
        let status = ch.update(0, 10_000_000, false);
        assert!(status.active);
    }

    #[test]
    fn channel_deactivates_after_disable_timeout() {
        let mut ch = MixerChannel::new(1, "test", Category::SoundFX, spec(), spec());
        ch.disable_timeout_ns = 1_000;
        ch.set_generator(Box::new(|_span, _pre, _first| true));
        ch.update(0, 1_000, false);
        assert!(ch.is_active());

        ch.set_generator(Box::new(|_span, _pre, _first| false));
        ch.update(500, 1_000, false);
        assert!(ch.is_active(), "stays active until the deadline passes");
        ch.update(1_500, 1_000, false);
        assert!(!ch.is_active());
    }

    #[test]
    fn disabled_channel_does_not_run_generator_but_reports_status() {
        let mut ch = MixerChannel::new(1, "test", Category::SoundFX, spec(), spec());
        ch.enabled = false;
        let status = ch.update(0, 1_000, false);
        assert!(!status.enabled);
    }

    #[test]
    fn unity_dsp_passes_samples_through_within_1_lsb() {
        let mut ch = MixerChannel::new(1, "test", Category::AudioCard, spec(), spec());
        ch.set_generator(Box::new(|_span, _pre, _first| false));
        ch.push_input(&[0.5, -0.5, 0.25, -0.25]);
        ch.update(0, 1_000, false);
        let out = ch.take_output(2);
        assert_eq!(out, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn flush_drops_pending_frames() {
        let mut ch = MixerChannel::new(1, "test", Category::SoundFX, spec(), spec());
        ch.push_input(&[1.0, 1.0]);
        ch.flush();
        ch.update(0, 1_000, false);
        assert!(ch.take_output(16).is_empty());
    }
}
