//! Project configuration
//!
//! A `Lyra.toml` next to the source provides build defaults; command-line
//! flags override them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// log2 of the jump-table entry stride.
    pub jumpcase_stride_log2: u32,
    /// Extra bytes reserved at the top of each stack page.
    pub stackpage_provision: u32,
    /// Attach source attribution to the binary.
    pub debug_info: bool,
    /// Narrate register traffic in the IR.
    pub comments: bool,
    /// Refuse imports of undefined functions.
    pub no_import: bool,
    /// Ignore export keywords.
    pub no_export: bool,
    /// Every function owns its stackframe.
    pub no_frame_sharing: bool,
    /// Treat every variable as volatile (debugger-friendly).
    pub all_volatile: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jumpcase_stride_log2: 3,
            stackpage_provision: 0,
            debug_info: false,
            comments: false,
            no_import: false,
            no_export: false,
            no_frame_sharing: false,
            all_volatile: false,
        }
    }
}

impl ProjectConfig {
    /// Load `Lyra.toml` from the source file's directory, when present.
    pub fn load_near(source: &Path) -> Result<Self> {
        let dir = source.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join("Lyra.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let cfg: ProjectConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.build.jumpcase_stride_log2, 3);
        assert!(!cfg.build.debug_info);
    }

    #[test]
    fn build_section_overrides() {
        let cfg: ProjectConfig =
            toml::from_str("[build]\njumpcase_stride_log2 = 2\ndebug_info = true\n").unwrap();
        assert_eq!(cfg.build.jumpcase_stride_log2, 2);
        assert!(cfg.build.debug_info);
    }
}
