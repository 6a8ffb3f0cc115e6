//! Playable track references.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use lofty::file::TaggedFileExt;
use lofty::tag::Accessor;
use tracing::debug;

/// One playable audio file plus its display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    path: PathBuf,
    label: String,
}

impl Track {
    /// Resolve a track from its file path.
    pub(crate) fn from_path(path: PathBuf) -> Self {
        let label = label_for(&path);
        Self { path, label }
    }

    /// Path of the audio file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display label shown on stream and in the dashboard.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Artist and title as found in a file's tags.
#[derive(Debug, Default)]
struct TrackTags {
    artist: Option<String>,
    title: Option<String>,
}

/// "artist - title" from the tags, with the file stem standing in for a
/// missing title. Without an artist the label is the title alone.
fn label_for(path: &Path) -> String {
    let tags = read_tags(path).unwrap_or_default();
    let title = tags.title.unwrap_or_else(|| stem_label(path));

    match tags.artist {
        Some(artist) => format!("{} - {}", artist, title),
        None => title,
    }
}

fn read_tags(path: &Path) -> Option<TrackTags> {
    let tagged = match lofty::read_from_path(path) {
        Ok(tagged) => tagged,
        Err(e) => {
            debug!(path = %path.display(), "No readable tags: {}", e);
            return None;
        }
    };
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;

    Some(TrackTags {
        artist: clean(tag.artist()),
        title: clean(tag.title()),
    })
}

fn clean(value: Option<Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

/// "artist_-_title.mp3" becomes "artist - title".
fn stem_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let label = stem.replace('_', " ");
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");

    if label.is_empty() {
        path.to_string_lossy().into_owned()
    } else {
        label
    }
}
