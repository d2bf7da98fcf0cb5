use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Modality::Text => "TEXT",
            Modality::Image => "IMAGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, bytes: Vec<u8> },
}

/// One logical "generate content" call, independent of the model it is
/// eventually sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub parts: Vec<ContentPart>,
    pub modalities: Vec<Modality>,
}

impl ModelRequest {
    pub fn text_only(parts: Vec<ContentPart>) -> Self {
        Self {
            parts,
            modalities: vec![Modality::Text],
        }
    }

    pub fn text_and_image(parts: Vec<ContentPart>) -> Self {
        Self {
            parts,
            modalities: vec![Modality::Text, Modality::Image],
        }
    }

    pub fn wants_image(&self) -> bool {
        self.modalities.contains(&Modality::Image)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
    pub images: Vec<InlineImage>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn first_image(&self) -> Option<&InlineImage> {
        self.images.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Quota or throttling; worth one more attempt on the same model.
    RateLimited,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{model}: {message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub model: String,
    pub message: String,
}

impl ModelError {
    pub fn rate_limited(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::RateLimited,
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn other(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Other,
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == ModelErrorKind::RateLimited
    }
}

/// Backend able to run a [`ModelRequest`] against a named model.
pub trait ModelService: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, model: &str, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}
