use std::fs;
use std::path::Path;

use chrono::Local;

use crate::error::{AppError, AppResult};

/// Metalink document describing one target file and the replica URLs it can be
/// fetched from. The transfer engine treats it as a single multi-source job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub published: String,
    /// Local file the replicas are downloaded to.
    pub target: String,
    pub size: String,
    pub md5: String,
    pub urls: Vec<String>,
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn cdata(s: &str) -> String {
    format!("<![CDATA[{}]]>", s.replace("]]>", "]]]]><![CDATA[>"))
}

impl Manifest {
    pub fn new(target: impl Into<String>, size: impl Into<String>, md5: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            published: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            target: target.into(),
            size: size.into(),
            md5: md5.into(),
            urls,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(" <metalink xmlns=\"urn:ietf:params:xml:ns:metalink\">\n");
        out.push_str(&format!("   <published>{}</published>\n", xml_escape(&self.published)));
        out.push_str(&format!("   <file name=\"{}\">\n", xml_escape(&self.target)));
        out.push_str(&format!("     <size>{}</size>\n", xml_escape(&self.size)));
        out.push_str(&format!("     <hash type=\"md5\">{}</hash>\n", xml_escape(&self.md5)));
        for url in &self.urls {
            out.push_str(&format!("     <url>{}</url>\n", cdata(url)));
        }
        out.push_str("   </file>\n");
        out.push_str(" </metalink>\n");
        out
    }

    /// Write the document, replacing any stale manifest at `path`.
    pub fn write_to(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| AppError::io("manifest_write", format!("{}: {}", dir.display(), e)))?;
        }
        fs::write(path, self.render()).map_err(|e| AppError::io("manifest_write", format!("{}: {}", path.display(), e)))
    }
}
