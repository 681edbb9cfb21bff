//! The pluggable content-transform step of the upload pipeline.

use crate::models::{
    content::{Content, ContentTypeInfo},
    object_name::ObjectName,
};
use async_trait::async_trait;
use std::{
    io,
    path::{Path, PathBuf},
};

/// Output of one processor.
#[derive(Debug)]
pub struct Processed {
    /// Content for the next processor. Processors that leave the bytes alone
    /// hand back the handle they were given.
    pub content: Content,

    /// Remote name to use instead of the path-derived one.
    pub name: Option<ObjectName>,

    /// Absolute local paths that must be uploaded alongside this file.
    pub dependencies: Vec<PathBuf>,
}

impl Processed {
    pub fn passthrough(content: Content) -> Self {
        Self {
            content,
            name: None,
            dependencies: Vec::new(),
        }
    }
}

/// A transform applied to every file before upload.
///
/// Processors run in registration order and keep no state between calls
/// beyond what they were constructed with.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        content: Content,
        path: &Path,
        type_info: &ContentTypeInfo,
    ) -> io::Result<Processed>;
}
