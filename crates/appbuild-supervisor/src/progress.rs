//! Progress classification for build container output
//!
//! Build toolchains print free-form text. A [`ProgressClassifier`] turns one
//! line of that text into a structured [`Classification`], or nothing when the
//! line carries no progress information. The registry keeps the public
//! percentage non-decreasing, so classifiers are free to report lower values.

use std::fmt;

use serde::Serialize;

/// Coarse build phase recognised in process output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    /// Fetching dependencies
    Dependencies,
    /// Toolchain started
    BuildStart,
    /// Platform compilation
    Compile,
    /// Packaging or signing the artifact
    Packaging,
    /// Toolchain reported success
    Complete,
    /// Explicit `::progress::` line emitted by the build script
    Reported,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dependencies => "dependencies",
            Self::BuildStart => "build_start",
            Self::Compile => "compile",
            Self::Packaging => "packaging",
            Self::Complete => "complete",
            Self::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Structured progress derived from one output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub phase: BuildPhase,
    pub percent: u8,
    pub message: String,
}

/// Strategy mapping a raw output line to progress
pub trait ProgressClassifier: Send + Sync {
    /// Classify a single line (without its trailing newline)
    fn classify(&self, line: &str) -> Option<Classification>;
}

/// Substring marker mapped to a fixed percentage
#[derive(Debug, Clone)]
pub struct MarkerRule {
    marker: String,
    pub phase: BuildPhase,
    pub percent: u8,
    pub message: String,
}

impl MarkerRule {
    /// Create a rule; markers match case-insensitively
    pub fn new(
        marker: impl AsRef<str>,
        phase: BuildPhase,
        percent: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            marker: marker.as_ref().to_lowercase(),
            phase,
            percent: percent.min(100),
            message: message.into(),
        }
    }

    /// Lowercased marker text
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

/// Default classifier: ordered substring rules, first match wins
///
/// Lines of the form `::progress::<percent>[::<message>]` are honoured before
/// any rule so build scripts can report progress explicitly.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    rules: Vec<MarkerRule>,
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        use BuildPhase::*;

        Self::new(vec![
            MarkerRule::new("installing dependencies", Dependencies, 20, "Installing dependencies"),
            MarkerRule::new("npm install", Dependencies, 20, "Installing dependencies"),
            MarkerRule::new("yarn install", Dependencies, 20, "Installing dependencies"),
            MarkerRule::new("pod install", Dependencies, 20, "Installing dependencies"),
            MarkerRule::new("starting build", BuildStart, 30, "Building application"),
            MarkerRule::new("building web assets", BuildStart, 30, "Building application"),
            MarkerRule::new("> task :", Compile, 50, "Compiling for target platform"),
            MarkerRule::new("gradle", Compile, 50, "Compiling for target platform"),
            MarkerRule::new("xcodebuild", Compile, 50, "Compiling for target platform"),
            MarkerRule::new("compiling", Compile, 50, "Compiling for target platform"),
            MarkerRule::new("packaging", Packaging, 90, "Packaging artifact"),
            MarkerRule::new("signing", Packaging, 90, "Packaging artifact"),
            MarkerRule::new("creating archive", Packaging, 90, "Packaging artifact"),
            MarkerRule::new("build successful", Complete, 100, "Build finished"),
            MarkerRule::new("build completed", Complete, 100, "Build finished"),
            MarkerRule::new("archive succeeded", Complete, 100, "Build finished"),
        ])
    }
}

impl MarkerClassifier {
    /// Create a classifier from ordered rules
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        Self { rules }
    }

    /// Configured rules, in match order
    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }
}

impl ProgressClassifier for MarkerClassifier {
    fn classify(&self, line: &str) -> Option<Classification> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(reported) = parse_reported(line) {
            return Some(reported);
        }

        let lowered = line.to_lowercase();
        self.rules
            .iter()
            .find(|rule| lowered.contains(rule.marker()))
            .map(|rule| Classification {
                phase: rule.phase,
                percent: rule.percent,
                message: rule.message.clone(),
            })
    }
}

/// Parse a `::progress::<percent>[::<message>]` line
fn parse_reported(line: &str) -> Option<Classification> {
    let content = line.strip_prefix("::progress::")?;
    let mut parts = content.splitn(2, "::");
    let percent: u8 = parts.next()?.trim().parse::<u16>().ok()?.min(100) as u8;
    let message = parts
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("Building")
        .to_string();

    Some(Classification { phase: BuildPhase::Reported, percent, message })
}

/// Splits streamed output chunks into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);
            lines.push(line);
        }
        lines
    }

    /// Take the trailing partial line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
