//! Boundary to the terminal rendering widget.
//!
//! Glyph rendering and keyboard capture live outside this crate. The engine
//! only needs a handle it can open, write bytes to, resize and focus. Input
//! typed into a widget comes back to the engine as
//! [`Command::Input`](crate::session::Command::Input).

use std::fmt;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl Geometry {
    /// Create a geometry from columns and rows.
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// A geometry with a zero dimension cannot be rendered and is never sent.
    pub const fn is_degenerate(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A rendering surface for one instance's terminal.
pub trait TerminalWidget: fmt::Debug + Send {
    /// Mount the widget. Called once, before any write.
    fn open(&mut self);

    /// Render raw terminal bytes.
    fn write(&mut self, data: &[u8]);

    /// Change the widget's geometry.
    fn resize(&mut self, geometry: Geometry);

    /// Give the widget keyboard focus.
    fn focus(&mut self);

    /// Geometry that would fill the widget's container, if it can tell.
    fn propose_geometry(&self) -> Option<Geometry> {
        None
    }
}

/// Creates widgets on demand when an instance is first selected.
pub trait WidgetFactory: fmt::Debug + Send {
    /// Build an unopened widget for the named instance.
    fn create(&mut self, instance: &str) -> Box<dyn TerminalWidget>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_geometry() {
        assert!(Geometry::new(0, 24).is_degenerate());
        assert!(Geometry::new(80, 0).is_degenerate());
        assert!(!Geometry::new(80, 24).is_degenerate());
    }

    #[test]
    fn test_geometry_display() {
        assert_eq!(Geometry::new(80, 24).to_string(), "80x24");
    }
}
