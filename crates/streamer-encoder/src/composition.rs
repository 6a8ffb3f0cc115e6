//! Declarative overlay composition for the published picture.

use std::path::{Path, PathBuf};

use crate::OVERLAY_PADDING;

const STATUS_FONT_SIZE: u32 = 24;
const SPECTRUM_WIDTH: u32 = 140;
const SPECTRUM_HEIGHT: u32 = 28;

/// What goes on top of the camera feed.
///
/// The base feed is always scaled to the output size. Every overlay is
/// optional; an overlay whose file is missing at spawn time is left out.
#[derive(Debug, Clone)]
pub struct Composition {
    width: u32,
    height: u32,
    logo: Option<PathBuf>,
    status_text: Option<PathBuf>,
    clock: bool,
    spectrum: bool,
}

impl Composition {
    /// Bare base feed at `width`x`height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            logo: None,
            status_text: None,
            clock: false,
            spectrum: false,
        }
    }

    /// Overlay an image in the top-right corner.
    pub fn with_logo(mut self, path: impl Into<PathBuf>) -> Self {
        self.logo = Some(path.into());
        self
    }

    /// Overlay the contents of a text file, re-read as it changes.
    pub fn with_status_text(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_text = Some(path.into());
        self
    }

    /// Overlay the local wall-clock time in the top-left corner.
    pub fn with_clock(mut self, enabled: bool) -> Self {
        self.clock = enabled;
        self
    }

    /// Overlay a small audio spectrum bar in the bottom-left corner.
    pub fn with_spectrum(mut self, enabled: bool) -> Self {
        self.spectrum = enabled;
        self
    }

    /// Output size.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The logo, if configured and present on disk.
    pub fn logo(&self) -> Option<&Path> {
        self.logo.as_deref().filter(|path| path.is_file())
    }

    /// The status text file, if configured and present on disk.
    pub fn status_text(&self) -> Option<&Path> {
        self.status_text.as_deref().filter(|path| path.is_file())
    }

    /// Build the filter graph.
    ///
    /// Input 0 is video, input 1 is audio, and the logo (when present) is
    /// input 2. The graph always ends in the `[vout]` label.
    pub fn filter_graph(&self) -> String {
        let mut chains = Vec::new();
        let mut label = "v0".to_string();

        if self.spectrum {
            chains.push(format!(
                "[1:a]showfreqs=mode=bar:ascale=log:colors=0xCCCCCC:size={}x{}[viz]",
                SPECTRUM_WIDTH, SPECTRUM_HEIGHT
            ));
        }

        chains.push(format!(
            "[0:v]scale={}:{},format=yuv420p[{}]",
            self.width, self.height, label
        ));

        let text_y = self.height.saturating_sub(SPECTRUM_HEIGHT + 30);
        let mut steps = Vec::new();

        if self.clock {
            steps.push(Step::Filter(format!(
                concat!(
                    "drawtext=text='%{{localtime}}':x={pad}:y={pad}",
                    ":fontsize={size}:fontcolor=white:borderw=2"
                ),
                pad = OVERLAY_PADDING,
                size = STATUS_FONT_SIZE
            )));
        }
        if self.logo().is_some() {
            steps.push(Step::Overlay {
                input: "2:v",
                position: format!("W-w-{pad}:{pad}", pad = OVERLAY_PADDING),
            });
        }
        if self.spectrum {
            steps.push(Step::Overlay {
                input: "viz",
                position: format!("{}:{}", OVERLAY_PADDING, text_y),
            });
        }
        if let Some(path) = self.status_text() {
            // Labels are shown verbatim; '%' in a title is not an expansion.
            steps.push(Step::Filter(format!(
                concat!(
                    "drawtext=textfile='{}':reload=1:expansion=none",
                    ":fontcolor=white:fontsize={}:x=w-tw-{}:y={}"
                ),
                escape_path(path),
                STATUS_FONT_SIZE,
                OVERLAY_PADDING,
                text_y
            )));
        }

        for (stage, step) in steps.into_iter().enumerate() {
            let next = format!("v{}", stage + 1);
            chains.push(match step {
                Step::Filter(filter) => format!("[{label}]{filter}[{next}]"),
                Step::Overlay { input, position } => {
                    format!("[{label}][{input}]overlay={position}[{next}]")
                }
            });
            label = next;
        }

        chains.push(format!("[{label}]null[vout]"));
        chains.join(";")
    }
}

enum Step {
    Filter(String),
    Overlay { input: &'static str, position: String },
}

/// Escape a path for use inside a quoted filter option.
fn escape_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_feed() {
        let graph = Composition::new(1280, 720).filter_graph();
        assert_eq!(graph, "[0:v]scale=1280:720,format=yuv420p[v0];[v0]null[vout]");
    }

    #[test]
    fn test_missing_files_are_left_out() {
        let composition = Composition::new(1280, 720)
            .with_logo("/nonexistent/logo.png")
            .with_status_text("/nonexistent/nowplaying.txt");
        assert!(composition.logo().is_none());
        assert!(composition.status_text().is_none());

        let graph = composition.filter_graph();
        assert!(!graph.contains("[2:v]"));
        assert!(!graph.contains("textfile"));
    }

    #[test]
    fn test_full_composition() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        let status = dir.path().join("nowplaying.txt");
        std::fs::write(&logo, b"png").unwrap();
        std::fs::write(&status, b"Now Playing: a").unwrap();

        let graph = Composition::new(1280, 720)
            .with_logo(&logo)
            .with_status_text(&status)
            .with_clock(true)
            .with_spectrum(true)
            .filter_graph();

        assert!(graph.starts_with("[1:a]showfreqs"));
        assert!(graph.contains("[v0]drawtext=text='%{localtime}'"));
        assert!(graph.contains("[v1][2:v]overlay=W-w-40:40[v2]"));
        assert!(graph.contains("[v2][viz]overlay=40:662[v3]"));
        assert!(graph.contains(&format!(
            "[v3]drawtext=textfile='{}':reload=1:expansion=none",
            escape_path(&status)
        )));
        assert!(graph.ends_with("[v4]null[vout]"));
    }

    #[test]
    fn test_status_text_is_not_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join("nowplaying.txt");
        std::fs::write(&status, b"Now Playing: 100% chill").unwrap();

        let graph = Composition::new(1280, 720)
            .with_status_text(&status)
            .with_clock(true)
            .filter_graph();

        let status_filter = graph
            .split(';')
            .find(|chain| chain.contains("textfile="))
            .unwrap();
        assert!(status_filter.contains(":expansion=none"));

        // The clock still relies on expansion.
        let clock_filter = graph
            .split(';')
            .find(|chain| chain.contains("localtime"))
            .unwrap();
        assert!(!clock_filter.contains("expansion=none"));
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path(Path::new("/tmp/a:b.txt")), "/tmp/a\\:b.txt");
    }
}
