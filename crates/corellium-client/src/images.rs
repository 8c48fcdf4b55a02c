use corellium::image::{Image, ImageUpload};

use reqwest::multipart::{Form, Part};

use tracing::info;

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{Transport, join_path};

fn upload_form(upload: ImageUpload) -> Form {
    let ImageUpload {
        kind,
        encoding,
        name,
        project,
        instance,
        encapsulated,
        file,
    } = upload;

    let form = Form::new()
        .text("type", kind.name())
        .text("encoding", encoding.name())
        .text("encapsulated", encapsulated.to_string())
        .text("name", name.clone());

    let form = match project {
        Some(project) => form.text("project", project),
        None => form,
    };

    let form = match instance {
        Some(instance) => form.text("instance", instance),
        None => form,
    };

    form.part("file", Part::bytes(file).file_name(name))
}

/// Images stored by the API, such as firmware, extensions and wordlists.
#[derive(Debug, Clone)]
pub struct Images {
    transport: Transport,
    root: String,
}

impl Images {
    pub(crate) fn new(transport: Transport, api_root: &str) -> Self {
        Self {
            transport,
            root: join_path(api_root, "images"),
        }
    }

    /// Uploads an image.
    ///
    /// # Errors
    ///
    /// Fails when the upload is refused or when the API does not return
    /// the identifier of the new image.
    pub async fn create(&self, upload: ImageUpload) -> Result<Image> {
        let image = self.upload(upload).await?;
        if image.id.as_deref().is_none_or(str::is_empty) {
            return Err(Error::new(ErrorKind::Protocol, "Image ID not returned from API"));
        }
        Ok(image)
    }

    // An empty or bare answer yields an image without an identifier.
    pub(crate) async fn upload(&self, upload: ImageUpload) -> Result<Image> {
        info!(
            "Uploading image `{}` of type {}",
            upload.name,
            upload.kind.name()
        );

        let image: Option<Image> = self
            .transport
            .post_multipart(&self.root, upload_form(upload))
            .await?;
        Ok(image.unwrap_or_default())
    }

    /// Retrieves an [`Image`].
    ///
    /// # Errors
    ///
    /// Fails when the image does not exist or cannot be retrieved.
    pub async fn get(&self, id: &str) -> Result<Image> {
        self.transport.get(&join_path(&self.root, id)).await
    }

    /// Deletes an image.
    ///
    /// # Errors
    ///
    /// Fails when the image does not exist or cannot be deleted.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.transport.delete(&join_path(&self.root, id)).await
    }
}
