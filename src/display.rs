//! Status surfaces: the 16x2 RGB character display next to the button and
//! the fullscreen slideshow output. The drivers behind both live outside
//! this crate; the orchestration layer only writes the fixed screens.

use std::fmt;
use std::path::Path;

/// The character/color display interface.
pub trait StatusDisplay {
    /// Sets the backlight color.
    fn set_color(&mut self, r: u8, g: u8, b: u8);
    /// Blanks the text.
    fn clear(&mut self);
    /// Writes `text` starting at (`col`, `row`).
    fn write_at(&mut self, col: u8, row: u8, text: &str);
}

/// Errors from the slideshow surface.
#[derive(Debug)]
pub struct DisplayError(pub String);

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "display error: {}", self.0)
    }
}

impl std::error::Error for DisplayError {}

/// The fullscreen image surface facing the visitors.
pub trait SlideshowScreen {
    /// Shows the image at `path` fullscreen.
    fn show_image(&mut self, path: &Path) -> Result<(), DisplayError>;
    /// Tears down whatever window or framebuffer the screen holds.
    fn release(&mut self);
}

/// White backlight, "press to start" prompt.
pub fn show_hello(display: &mut dyn StatusDisplay) {
    display.set_color(200, 200, 200);
    display.clear();
    display.write_at(0, 0, "Hello! Press to");
    display.write_at(0, 1, "start ----->");
}

/// Orange backlight while the sequence plays out.
pub fn show_running(display: &mut dyn StatusDisplay) {
    display.set_color(255, 165, 0);
    display.clear();
    display.write_at(0, 0, "Running...");
}

/// Green backlight goodbye. Left on the display after exit.
pub fn show_finished(display: &mut dyn StatusDisplay) {
    display.set_color(0, 255, 0);
    display.clear();
    display.write_at(0, 0, "Thank you and");
    display.write_at(0, 1, "good bye");
}

/// Red backlight shown when orchestration fails.
pub fn show_error(display: &mut dyn StatusDisplay) {
    display.set_color(255, 0, 0);
    display.clear();
    display.write_at(0, 0, "Something is");
    display.write_at(0, 1, "wrong");
}
