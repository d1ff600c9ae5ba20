//! The single momentary button in front of the installation. Edge
//! detection and debouncing belong to the driver behind this trait; the
//! orchestration layer consumes presses either as a blocking wait (while
//! idle) or as a registered callback (to stop a running sequence).

/// The button interface.
pub trait ButtonInput {
    /// Blocks until the next press.
    fn wait_for_press(&mut self);
    /// Installs `callback` to run on every press until cleared. Replaces
    /// any earlier callback.
    fn on_press(&mut self, callback: Box<dyn Fn() + Send>);
    /// Removes the installed callback, if any.
    fn clear_press_handler(&mut self);
}
