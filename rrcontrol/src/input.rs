//! Logical controls delivered by input drivers.

/// One debounced user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    PlayPause,
    Previous,
    Next,
    CycleSource,
    /// Encoder detents, positive clockwise
    VolumeChange(i32),
    MuteToggle,
    Status,
    ReloadSources,
    Quit,
}

impl Control {
    pub fn as_str(&self) -> &'static str {
        match self {
            Control::PlayPause => "play_pause",
            Control::Previous => "previous",
            Control::Next => "next",
            Control::CycleSource => "cycle_source",
            Control::VolumeChange(_) => "volume_change",
            Control::MuteToggle => "mute_toggle",
            Control::Status => "status",
            Control::ReloadSources => "reload_sources",
            Control::Quit => "quit",
        }
    }
}

/// Source of [`Control`] events (GPIO buttons, keyboard, ...).
///
/// `run` blocks, calling `handler` synchronously for each event from the
/// driver's own thread, until the driver is exhausted or `handler` returns
/// `false`.
pub trait InputDriver {
    fn run(&mut self, handler: &mut dyn FnMut(Control) -> bool);
}
