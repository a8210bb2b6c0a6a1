use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{normalize_local_path, ArtifactId, Side};

/// Bidirectional mapping between side-specific file paths and [`ArtifactId`]s.
///
/// Implementations must be a bijection: for every path `p` that maps to `Some(id)`,
/// `to_path(&id, side_of(p))` must return `p` (after lexical normalization).
pub trait NamingConvention: Send + Sync {
    /// Which side's tree `path` belongs to, if any.
    fn side_of(&self, path: &Path) -> Option<Side>;

    fn to_artifact_id(&self, path: &Path) -> Option<ArtifactId>;

    fn to_path(&self, id: &ArtifactId, side: Side) -> PathBuf;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCase {
    /// `UserProfile`
    Pascal,
    /// `userProfile`
    Camel,
    /// `user_profile`
    Snake,
    /// `user-profile`
    Kebab,
}

impl FileCase {
    pub fn render(self, words: &[String]) -> String {
        match self {
            FileCase::Pascal => words.iter().map(|w| capitalize(w)).collect(),
            FileCase::Camel => words
                .iter()
                .enumerate()
                .map(|(idx, w)| if idx == 0 { w.clone() } else { capitalize(w) })
                .collect(),
            FileCase::Snake => words.join("_"),
            FileCase::Kebab => words.join("-"),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Splits an identifier in any supported case into lowercase words.
///
/// Handles `_`/`-`/space separators, lower→upper transitions and acronym boundaries
/// (`HTMLParser` → `html`, `parser`).
pub(crate) fn split_words(segment: &str) -> Vec<String> {
    let chars: Vec<char> = segment.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (idx, &c) in chars.iter().enumerate() {
        if matches!(c, '_' | '-' | ' ' | '.') {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[idx - 1];
            let next_is_lower = chars.get(idx + 1).is_some_and(|next| next.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }

        current.extend(c.to_lowercase());
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Where one side keeps its files and how it names them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideLayout {
    pub root: PathBuf,
    /// File extension without the leading dot (e.g. `tsx`).
    pub extension: String,
    pub case: FileCase,
}

impl SideLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>, case: FileCase) -> Self {
        let extension = extension.into();
        Self {
            root: normalize_local_path(&root.into()),
            extension: extension.trim_start_matches('.').to_owned(),
            case,
        }
    }
}

/// Reference [`NamingConvention`]: both sides mirror the same directory tree verbatim, and only
/// the file stem is rendered in the side's [`FileCase`].
///
/// `a/forms/LoginButton.tsx` (pascal) ↔ `forms.login-button` ↔ `b/forms/login_button.dart`
/// (snake).
///
/// Directory names must already be valid id segments (lowercase, digits, `-`), and a stem must be
/// spelled exactly as the side's case renders it. Anything else (`Forms/`, `button.tsx` on a
/// pascal side, `Button.test.tsx`) is not an artifact, so no two paths share an id.
#[derive(Debug, Clone)]
pub struct CaseNamingConvention {
    side_a: SideLayout,
    side_b: SideLayout,
}

impl CaseNamingConvention {
    pub fn new(side_a: SideLayout, side_b: SideLayout) -> Self {
        Self { side_a, side_b }
    }

    pub fn layout(&self, side: Side) -> &SideLayout {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }
}

fn kebab_segment(segment: &str) -> Option<String> {
    let words = split_words(segment);
    if words.is_empty() {
        return None;
    }
    Some(FileCase::Kebab.render(&words))
}

fn is_id_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl NamingConvention for CaseNamingConvention {
    fn side_of(&self, path: &Path) -> Option<Side> {
        let path = normalize_local_path(path);
        // Prefer the most specific root in case one root contains the other.
        Side::ALL
            .into_iter()
            .filter(|side| path.starts_with(&self.layout(*side).root))
            .max_by_key(|side| self.layout(*side).root.components().count())
    }

    fn to_artifact_id(&self, path: &Path) -> Option<ArtifactId> {
        let path = normalize_local_path(path);
        let side = self.side_of(&path)?;
        let layout = self.layout(side);
        let rel = path.strip_prefix(&layout.root).ok()?;

        let file_name = rel.file_name()?.to_str()?;
        let stem = file_name.strip_suffix(&format!(".{}", layout.extension))?;

        let mut segments = Vec::new();
        if let Some(parent) = rel.parent() {
            for component in parent.components() {
                let Component::Normal(dir) = component else {
                    return None;
                };
                let dir = dir.to_str()?;
                if !is_id_segment(dir) {
                    return None;
                }
                segments.push(dir.to_owned());
            }
        }
        segments.push(kebab_segment(stem)?);

        let id = ArtifactId::from_segments(segments.iter().map(String::as_str))?;
        (self.to_path(&id, side) == path).then_some(id)
    }

    fn to_path(&self, id: &ArtifactId, side: Side) -> PathBuf {
        let layout = self.layout(side);
        let segments: Vec<&str> = id.segments().collect();
        let mut path = layout.root.clone();
        if let Some((stem, dirs)) = segments.split_last() {
            for dir in dirs {
                path.push(dir);
            }
            let file = format!(
                "{}.{}",
                layout.case.render(&split_words(stem)),
                layout.extension
            );
            path.push(file);
        }
        path
    }
}
