//! Pipeline stages for a transcription + summary run.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own and the orchestrator in [`crate::workflow`] stays a
//! plain sequence of calls.
//!
//! ## Data Flow
//!
//! ```text
//! stage ──▶ render ──▶ encode ──▶ llm ──▶ assemble
//! (temp)    (pdfium)   (base64)   (VLM)   (txt + docx)
//! ```
//!
//! 1. [`stage`]    — write the upload to a temp file that keeps its extension
//! 2. [`render`]   — rasterise PDF pages to `page_<n>.png`; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]   — base64-wrap each image for the multimodal request body
//! 4. [`llm`]      — extraction and summary calls with timeout/retry; the only
//!    stage with network I/O
//! 5. [`assemble`] — write `output.txt`, `summary.txt` and `output.docx`

pub mod assemble;
pub mod encode;
pub mod llm;
pub mod render;
pub mod stage;
