use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chibi_contracts::models::ModelTiers;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::model::{ModelError, ModelRequest, ModelResponse, ModelService};
use crate::policy::Pacer;

/// Model service driven by a closure receiving `(model, attempt_on_model, request)`.
pub(crate) struct FnService<F> {
    handler: F,
    calls: Mutex<Vec<String>>,
}

impl<F> FnService<F>
where
    F: Fn(&str, usize, &ModelRequest) -> Result<ModelResponse, ModelError> + Send + Sync,
{
    pub(crate) fn new(handler: F) -> Arc<Self> {
        Arc::new(Self {
            handler,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub(crate) fn count(&self, model: &str) -> usize {
        self.calls().iter().filter(|name| name.as_str() == model).count()
    }
}

impl<F> ModelService for FnService<F>
where
    F: Fn(&str, usize, &ModelRequest) -> Result<ModelResponse, ModelError> + Send + Sync,
{
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, model: &str, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let attempt = {
            let mut calls = self.calls.lock().expect("calls lock");
            let attempt = calls.iter().filter(|name| name.as_str() == model).count();
            calls.push(model.to_string());
            attempt
        };
        (self.handler)(model, attempt, request)
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingPacer {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().map(|pauses| pauses.clone()).unwrap_or_default()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        self.pauses.lock().expect("pauses lock").push(duration);
    }
}

pub(crate) fn tiers(names: &[&str]) -> ModelTiers {
    ModelTiers::from_csv(&names.join(",")).expect("non-empty tiers")
}

/// White canvas with a noisy, hard-to-compress block in the middle.
pub(crate) fn character_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    for y in height / 8..height - height / 8 {
        for x in width / 4..width - width / 4 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            image.put_pixel(x, y, Rgba([r / 2, g / 2, b / 2, 255]));
        }
    }
    encode_png(&image)
}

pub(crate) fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encode");
    bytes
}
