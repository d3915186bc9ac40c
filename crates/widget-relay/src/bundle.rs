//! Widget bundle loading.
//!
//! Bundling itself is an external build step; this module only reads the
//! prebuilt `<name>.js` / `<name>.css` artifacts from a `dist/` directory and
//! wraps them into a self-contained HTML document with a root mount node.

use crate::resource::ResourceError;
use std::path::PathBuf;

/// Directory of prebuilt widget artifacts.
#[derive(Debug, Clone)]
pub struct BundleDir {
    root: PathBuf,
}

/// One loaded widget bundle.
#[derive(Debug, Clone)]
pub struct WidgetBundle {
    pub name: String,
    pub script: String,
    pub styles: Option<String>,
}

impl BundleDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Load one widget's artifacts.
    ///
    /// The script is required; a missing file is an `AssetNotFound` naming
    /// the exact path. Styles are optional.
    pub fn load(&self, name: &str) -> Result<WidgetBundle, ResourceError> {
        let script_path = self.root.join(format!("{name}.js"));
        let script = match std::fs::read_to_string(&script_path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResourceError::AssetNotFound { path: script_path });
            }
            Err(e) => {
                return Err(ResourceError::Io {
                    path: script_path,
                    source: e,
                });
            }
        };

        let styles_path = self.root.join(format!("{name}.css"));
        let styles = match std::fs::read_to_string(&styles_path) {
            Ok(s) => Some(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(ResourceError::Io {
                    path: styles_path,
                    source: e,
                });
            }
        };

        Ok(WidgetBundle {
            name: name.to_string(),
            script,
            styles,
        })
    }
}

impl WidgetBundle {
    /// Render as a standalone HTML document.
    pub fn into_html(self) -> String {
        let styles = self
            .styles
            .map(|css| format!("<style>\n{css}\n</style>\n"))
            .unwrap_or_default();
        format!(
            "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n{styles}</head>\n\
             <body>\n<div id=\"{}-root\"></div>\n<script type=\"module\">\n{}\n</script>\n</body>\n</html>\n",
            self.name, self.script
        )
    }
}
