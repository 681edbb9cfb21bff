//! Dependency discovery for HTML documents.
//!
//! Every `href`/`src` attribute is treated as a candidate reference. Local
//! references that resolve to an existing file inside the watch root are
//! reported as dependencies; external URLs, broken links and anything that
//! escapes the root are dropped. The markup itself is passed through
//! untouched, links are not rewritten.

use crate::{
    models::{
        content::{Content, ContentTypeInfo},
        object_name::WatchRoot,
    },
    sync::processor::{Processed, Processor},
};
use async_trait::async_trait;
use html_parser::{Dom, Node};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};
use url::{ParseError, Url};

const LINK_ATTRIBUTES: [&str; 2] = ["href", "src"];

pub struct HtmlLinkProcessor {
    watch_root: WatchRoot,
}

impl HtmlLinkProcessor {
    pub fn new(watch_root: WatchRoot) -> Self {
        Self { watch_root }
    }

    /// Map one attribute value to a local dependency, if it is one.
    async fn resolve(&self, reference: &str, source: &Path) -> Option<PathBuf> {
        let reference = reference.trim();
        let path_part = reference.split(['?', '#']).next().unwrap_or_default();
        if path_part.is_empty() {
            return None;
        }

        let target = match Url::parse(reference) {
            Ok(url) if url.scheme() == "file" => url,
            Ok(_) => {
                debug!(reference, "ignoring external reference");
                return None;
            }
            Err(ParseError::RelativeUrlWithoutBase) if reference.starts_with("//") => {
                debug!(reference, "ignoring protocol-relative reference");
                return None;
            }
            Err(ParseError::RelativeUrlWithoutBase) => {
                // Root-relative references address the watch root, everything
                // else is relative to the referencing document.
                let (base, relative) = match reference.strip_prefix('/') {
                    Some(rooted) => (Url::from_directory_path(self.watch_root.as_path()), rooted),
                    None => (Url::from_file_path(source), reference),
                };
                match base.ok().map(|base| base.join(relative)) {
                    Some(Ok(url)) => url,
                    _ => {
                        warn!(reference, source = %source.display(), "cannot resolve reference");
                        return None;
                    }
                }
            }
            Err(err) => {
                warn!(reference, error = %err, "unparseable reference");
                return None;
            }
        };

        let path = target.to_file_path().ok()?;
        let canonical = match fs::canonicalize(&path).await {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    reference,
                    path = %path.display(),
                    source = %source.display(),
                    "referenced file does not exist"
                );
                return None;
            }
            Err(err) => {
                warn!(reference, path = %path.display(), error = %err, "cannot inspect referenced file");
                return None;
            }
        };

        if !self.watch_root.contains(&canonical) {
            warn!(
                reference,
                path = %canonical.display(),
                root = %self.watch_root.as_path().display(),
                "reference points outside the watch root"
            );
            return None;
        }

        match fs::metadata(&canonical).await {
            Ok(meta) if meta.is_file() => Some(canonical),
            _ => {
                debug!(reference, "reference is not a regular file");
                None
            }
        }
    }
}

#[async_trait]
impl Processor for HtmlLinkProcessor {
    fn name(&self) -> &'static str {
        "html-links"
    }

    async fn process(
        &self,
        mut content: Content,
        path: &Path,
        type_info: &ContentTypeInfo,
    ) -> io::Result<Processed> {
        if !type_info.is_html() || type_info.encoding.is_some() {
            debug!(path = %path.display(), "skipping non-HTML data");
            return Ok(Processed::passthrough(content));
        }

        let bytes = content.read_all().await?;
        let markup = String::from_utf8_lossy(&bytes);
        let references = match collect_references(&markup) {
            Ok(references) => references,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unparseable markup, no links collected");
                return Ok(Processed::passthrough(content));
            }
        };

        let mut dependencies = Vec::new();
        for reference in references {
            debug!(reference, "found link");
            if let Some(dependency) = self.resolve(&reference, path).await {
                dependencies.push(dependency);
            }
        }

        Ok(Processed {
            content,
            name: None,
            dependencies,
        })
    }
}

/// Attribute values of every `href`/`src`, in document order.
fn collect_references(markup: &str) -> Result<Vec<String>, html_parser::Error> {
    let dom = Dom::parse(markup)?;
    let mut references = Vec::new();

    let mut pending: Vec<&Node> = dom.children.iter().rev().collect();
    while let Some(node) = pending.pop() {
        if let Node::Element(element) = node {
            for (attribute, value) in &element.attributes {
                let is_link = LINK_ATTRIBUTES
                    .iter()
                    .any(|name| attribute.eq_ignore_ascii_case(name));
                if let (true, Some(value)) = (is_link, value) {
                    references.push(value.clone());
                }
            }
            pending.extend(element.children.iter().rev());
        }
    }

    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    struct Site {
        _dir: tempfile::TempDir,
        outer: PathBuf,
        root: WatchRoot,
    }

    impl Site {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let outer = stdfs::canonicalize(dir.path()).unwrap();
            stdfs::create_dir(outer.join("site")).unwrap();
            let root = WatchRoot::new(outer.join("site")).unwrap();
            Self {
                _dir: dir,
                outer,
                root,
            }
        }

        fn write(&self, relative: &str, body: &str) -> PathBuf {
            let path = self.root.as_path().join(relative);
            stdfs::create_dir_all(path.parent().unwrap()).unwrap();
            stdfs::write(&path, body).unwrap();
            path
        }
    }

    async fn run(site: &Site, page: &Path) -> Processed {
        let processor = HtmlLinkProcessor::new(site.root.clone());
        let content = Content::open(page).await.unwrap();
        processor
            .process(content, page, &ContentTypeInfo::guess(page))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn local_links_become_dependencies_and_external_ones_do_not() {
        let site = Site::new();
        let image = site.write("img/a.png", "png");
        let page = site.write(
            "index.html",
            r#"<!DOCTYPE html>
<html>
  <body>
    <img src="img/a.png">
    <img src="https://example.com/b.png">
  </body>
</html>"#,
        );

        let processed = run(&site, &page).await;
        assert_eq!(processed.dependencies, vec![image]);
        assert!(processed.name.is_none());
    }

    #[tokio::test]
    async fn references_escaping_the_root_are_dropped() {
        let site = Site::new();
        stdfs::write(site.outer.join("outside.txt"), "secret").unwrap();
        let page = site.write(
            "index.html",
            r#"<html><body><a href="../outside.txt">x</a><a href="../../etc/passwd">y</a></body></html>"#,
        );

        let processed = run(&site, &page).await;
        assert!(processed.dependencies.is_empty());
    }

    #[tokio::test]
    async fn broken_and_non_file_references_are_dropped() {
        let site = Site::new();
        site.write("docs/readme.txt", "hi");
        let page = site.write(
            "index.html",
            r##"<html><body>
<a href="missing.html">gone</a>
<a href="#top">top</a>
<a href="mailto:someone@example.com">mail</a>
<script src="//cdn.example.com/lib.js"></script>
<a href="docs/">folder</a>
</body></html>"##,
        );

        let processed = run(&site, &page).await;
        assert!(processed.dependencies.is_empty());
    }

    #[tokio::test]
    async fn rooted_links_resolve_against_the_watch_root() {
        let site = Site::new();
        let css = site.write("css/site.css", "body {}");
        let sibling = site.write("blog/other.html", "<p>other</p>");
        let page = site.write(
            "blog/post.html",
            r#"<html><head><link rel="stylesheet" href="/css/site.css?v=3"></head><body><a href="other.html#intro">next</a></body></html>"#,
        );

        let processed = run(&site, &page).await;
        assert_eq!(processed.dependencies, vec![css, sibling]);
    }

    #[tokio::test]
    async fn non_html_content_passes_through() {
        let site = Site::new();
        let text = site.write("notes.txt", r#"<a href="img/a.png">not markup</a>"#);
        site.write("img/a.png", "png");

        let mut processed = run(&site, &text).await;
        assert!(processed.dependencies.is_empty());
        assert_eq!(
            processed.content.read_all().await.unwrap(),
            br#"<a href="img/a.png">not markup</a>"#
        );
    }

    #[tokio::test]
    async fn markup_is_returned_unchanged() {
        let site = Site::new();
        site.write("img/a.png", "png");
        let body = r#"<html><body><img src="img/a.png"></body></html>"#;
        let page = site.write("index.html", body);

        let mut processed = run(&site, &page).await;
        assert_eq!(processed.content.read_all().await.unwrap(), body.as_bytes());
    }

    #[test]
    fn collects_href_and_src_in_document_order() {
        let references = collect_references(
            r#"<html><head><link href="a.css"></head><body><img src="b.png"><a href="c.html">c</a></body></html>"#,
        )
        .unwrap();
        assert_eq!(references, vec!["a.css", "b.png", "c.html"]);
    }
}
