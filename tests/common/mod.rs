//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use handscribe::{BackendError, CompletionBackend, ModelReply, ModelRequest};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(usize, &ModelRequest) -> Result<String, BackendError> + Send + Sync;

/// Backend answering from a closure `(call_index, request) -> reply`.
pub struct FakeBackend {
    name: String,
    calls: AtomicUsize,
    seen: Mutex<Vec<ModelRequest>>,
    respond: Box<Responder>,
}

impl FakeBackend {
    pub fn new<F>(name: &str, respond: F) -> Arc<Self>
    where
        F: Fn(usize, &ModelRequest) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Always replies with `text`.
    pub fn fixed(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new("fixed", move |_, _| Ok(text.clone()))
    }

    /// Replies `reply-1`, `reply-2`, ... in call order.
    pub fn numbered() -> Arc<Self> {
        Self::new("numbered", |n, _| Ok(format!("reply-{}", n + 1)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        (self.respond)(n, request).map(|content| ModelReply {
            content,
            prompt_tokens: 100,
            completion_tokens: 20,
        })
    }
}

pub fn image_bytes(format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([250, 250, 250])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn png_bytes() -> Vec<u8> {
    image_bytes(ImageFormat::Png)
}

/// A valid PDF with `pages` blank one-inch pages.
pub fn minimal_pdf(pages: usize) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages
        ),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 72 72] >>".to_string());
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}
