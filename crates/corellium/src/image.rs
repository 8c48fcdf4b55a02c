use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Image kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// A firmware image.
    Fwbinary,
    /// A kernel image.
    Kernel,
    /// A device tree.
    Devicetree,
    /// A generic binary.
    Binary,
    /// An extension file, such as an assessment wordlist.
    Extension,
    /// A ramdisk.
    Ramdisk,
    /// A backup.
    Backup,
    /// Any kind this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl ImageKind {
    /// Returns the name used on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fwbinary => "fwbinary",
            Self::Kernel => "kernel",
            Self::Devicetree => "devicetree",
            Self::Binary => "binary",
            Self::Extension => "extension",
            Self::Ramdisk => "ramdisk",
            Self::Backup => "backup",
            Self::Unknown => "unknown",
        }
    }
}

/// Image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    /// Raw content.
    Plain,
    /// Encrypted content.
    Encrypted,
}

impl ImageEncoding {
    /// Returns the name used on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Encrypted => "encrypted",
        }
    }
}

/// The data needed to upload an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    /// Image kind.
    pub kind: ImageKind,
    /// Image encoding.
    pub encoding: ImageEncoding,
    /// File name.
    pub name: String,
    /// Project owning the image.
    pub project: Option<String>,
    /// Instance the image is attached to.
    pub instance: Option<String>,
    /// Whether the file is a zip archive wrapping the content.
    pub encapsulated: bool,
    /// File content.
    pub file: Vec<u8>,
}

impl ImageUpload {
    /// Creates an [`ImageUpload`].
    #[must_use]
    pub fn new(
        kind: ImageKind,
        encoding: ImageEncoding,
        name: impl Into<String>,
        file: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            encoding,
            name: name.into(),
            project: None,
            instance: None,
            encapsulated: false,
            file: file.into(),
        }
    }

    /// Creates the wordlist upload used by assessments.
    ///
    /// Keywords are written one per line.
    #[must_use]
    pub fn wordlist<S: AsRef<str>>(keywords: &[S]) -> Self {
        let file = keywords
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(
            ImageKind::Extension,
            ImageEncoding::Plain,
            "keywords.txt",
            file,
        )
    }

    /// Sets the owning project.
    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the instance the image is attached to.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Marks the file as a zip archive.
    #[must_use]
    pub const fn encapsulated(mut self) -> Self {
        self.encapsulated = true;
        self
    }
}

/// An image stored by the API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Image {
    /// Image identifier.
    ///
    /// It might be missing from a creation response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Image name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image kind.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ImageKind>,
    /// All the other fields returned by the API.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
