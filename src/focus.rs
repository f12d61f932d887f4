//! Audio-focus handling.
//!
//! A [`FocusProvider`] decides whether playback may start at all; the
//! [`AudioFocusArbiter`] turns focus changes reported later into controller commands.

use crate::model::PlaybackState;

/// External arbitration of who may produce sound.
pub trait FocusProvider: Send {
    /// Returns `false` when focus is refused.
    fn request(&mut self) -> bool;
    fn abandon(&mut self);
}

/// Desktop default: nothing competes for output.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl FocusProvider for AlwaysGranted {
    fn request(&mut self) -> bool {
        true
    }

    fn abandon(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gained,
    LostPermanent,
    LostTransient,
    LostTransientCanDuck,
}

/// Commands the arbiter may issue. State transitions stay with the implementor.
pub trait FocusControl {
    fn playback_state(&self) -> PlaybackState;
    /// Resume without asking the focus provider again.
    fn resume_after_focus(&mut self);
    fn pause(&mut self);
    fn volume(&self) -> f32;
    fn set_volume(&mut self, left: f32, right: f32);
}

#[derive(Debug, Clone)]
pub struct AudioFocusArbiter {
    duck_volume: f32,
    was_playing: bool,
    pre_duck_volume: Option<f32>,
}

impl AudioFocusArbiter {
    pub fn new(duck_volume: f32) -> Self {
        Self {
            duck_volume: duck_volume.clamp(0.0, 1.0),
            was_playing: false,
            pre_duck_volume: None,
        }
    }

    pub fn was_playing(&self) -> bool {
        self.was_playing
    }

    pub fn is_ducked(&self) -> bool {
        self.pre_duck_volume.is_some()
    }

    pub fn handle(&mut self, change: FocusChange, control: &mut impl FocusControl) {
        tracing::debug!(?change, "audio focus changed");
        match change {
            FocusChange::Gained => self.on_gained(control, self.was_playing),
            FocusChange::LostPermanent => self.on_lost_permanent(control),
            FocusChange::LostTransient => self.on_lost_transient(control),
            FocusChange::LostTransientCanDuck => self.on_lost_transient_can_duck(control),
        }
    }

    /// Restores a ducked volume, then resumes if playback was interrupted by the loss.
    pub fn on_gained(&mut self, control: &mut impl FocusControl, was_playing_before_loss: bool) {
        if let Some(volume) = self.pre_duck_volume.take() {
            control.set_volume(volume, volume);
        }
        if was_playing_before_loss {
            control.resume_after_focus();
        }
        self.was_playing = false;
    }

    pub fn on_lost_permanent(&mut self, control: &mut impl FocusControl) {
        self.pause_if_playing(control);
    }

    pub fn on_lost_transient(&mut self, control: &mut impl FocusControl) {
        self.pause_if_playing(control);
    }

    pub fn on_lost_transient_can_duck(&mut self, control: &mut impl FocusControl) {
        if self.pre_duck_volume.is_none() {
            self.pre_duck_volume = Some(control.volume());
        }
        control.set_volume(self.duck_volume, self.duck_volume);
    }

    fn pause_if_playing(&mut self, control: &mut impl FocusControl) {
        if control.playback_state() == PlaybackState::Playing {
            self.was_playing = true;
            control.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Recorder {
        state: PlaybackState,
        volume: f32,
        calls: Vec<&'static str>,
    }

    impl Recorder {
        fn new(state: PlaybackState) -> Self {
            Self {
                state,
                volume: 0.8,
                calls: Vec::new(),
            }
        }
    }

    impl FocusControl for Recorder {
        fn playback_state(&self) -> PlaybackState {
            self.state
        }

        fn resume_after_focus(&mut self) {
            self.calls.push("play");
            self.state = PlaybackState::Playing;
        }

        fn pause(&mut self) {
            self.calls.push("pause");
            self.state = PlaybackState::Paused;
        }

        fn volume(&self) -> f32 {
            self.volume
        }

        fn set_volume(&mut self, left: f32, _right: f32) {
            self.calls.push("volume");
            self.volume = left;
        }
    }

    #[test]
    fn transient_loss_pauses_and_gain_resumes() {
        let mut arbiter = AudioFocusArbiter::new(0.3);
        let mut control = Recorder::new(PlaybackState::Playing);

        arbiter.handle(FocusChange::LostTransient, &mut control);
        assert!(arbiter.was_playing());
        arbiter.handle(FocusChange::Gained, &mut control);

        assert_eq!(control.calls, vec!["pause", "play"]);
        assert!(!arbiter.was_playing());
    }

    #[test]
    fn loss_while_paused_does_not_resume_later() {
        let mut arbiter = AudioFocusArbiter::new(0.3);
        let mut control = Recorder::new(PlaybackState::Paused);

        arbiter.on_lost_permanent(&mut control);
        arbiter.handle(FocusChange::Gained, &mut control);
        assert!(control.calls.is_empty());
    }

    #[test]
    fn duck_lowers_then_restores_volume() {
        let mut arbiter = AudioFocusArbiter::new(0.3);
        let mut control = Recorder::new(PlaybackState::Playing);

        arbiter.on_lost_transient_can_duck(&mut control);
        arbiter.on_lost_transient_can_duck(&mut control);
        assert_eq!(control.volume, 0.3);
        assert_eq!(control.state, PlaybackState::Playing);

        arbiter.on_gained(&mut control, false);
        assert_eq!(control.volume, 0.8);
        assert!(!arbiter.is_ducked());
    }
}
