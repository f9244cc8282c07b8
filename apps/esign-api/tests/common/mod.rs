//! Shared fixtures for the API integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use esign_api::auth::{AccessPolicy, HEADER_DOCTYPE, HEADER_EMAIL, HEADER_NAME, HEADER_SECRET};
use esign_api::drive::{DocumentStore, DriveError, DriveFile, TemplateFolders, FOLDER_MIME};
use esign_api::store::SessionStore;
use esign_api::webhook::EventNotifier;
use esign_api::{router, AppState, WorkflowSettings};
use esign_core::SignatureCache;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::Value;
use tower::ServiceExt;

pub const SECRET: &str = "correct-horse-battery";
pub const EMAIL: &str = "ann@example.com";
pub const NAME: &str = "Ann Lee";
pub const ROOT_FOLDER: &str = "root-folder";
pub const TEMPLATE_FOLDER: &str = "template-folder";
pub const BOUNDARY: &str = "esign-test-boundary";

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub meta: DriveFile,
    pub parent: String,
    pub bytes: Vec<u8>,
}

/// In-memory drive keyed by file id
#[derive(Default)]
pub struct FakeDrive {
    files: Mutex<HashMap<String, StoredFile>>,
    next_id: AtomicUsize,
    pub fail_uploads: AtomicBool,
}

impl FakeDrive {
    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn add_file(&self, parent: &str, name: &str, mime_type: &str, bytes: Vec<u8>) -> String {
        let id = self.id("file");
        let meta = DriveFile {
            id: id.clone(),
            name: name.to_string(),
            mime_type: Some(mime_type.to_string()),
            modified_time: None,
            web_view_link: None,
        };
        self.files.lock().unwrap().insert(
            id.clone(),
            StoredFile {
                meta,
                parent: parent.to_string(),
                bytes,
            },
        );
        id
    }

    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        self.add_file(parent, name, FOLDER_MIME, Vec::new())
    }

    /// Files directly under `parent`, in insertion order
    pub fn children(&self, parent: &str) -> Vec<StoredFile> {
        let files = self.files.lock().unwrap();
        let mut children: Vec<StoredFile> = files
            .values()
            .filter(|f| f.parent == parent)
            .cloned()
            .collect();
        children.sort_by_key(|f| sequence(&f.meta.id));
        children
    }

    pub fn folder_named(&self, parent: &str, name: &str) -> Option<String> {
        self.children(parent)
            .into_iter()
            .find(|f| f.meta.name == name && f.meta.mime_type.as_deref() == Some(FOLDER_MIME))
            .map(|f| f.meta.id)
    }

    pub fn file(&self, id: &str) -> Option<StoredFile> {
        self.files.lock().unwrap().get(id).cloned()
    }
}

fn sequence(id: &str) -> usize {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or_default()
}

#[async_trait]
impl DocumentStore for FakeDrive {
    async fn list_pdfs(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        // Newest first, like the real listing
        let mut pdfs: Vec<DriveFile> = self
            .children(folder_id)
            .into_iter()
            .filter(|f| f.meta.mime_type.as_deref() == Some("application/pdf"))
            .map(|f| f.meta)
            .collect();
        pdfs.reverse();
        Ok(pdfs)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        self.file(file_id)
            .map(|f| f.bytes)
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))
    }

    async fn ensure_child_folder(&self, parent_id: &str, name: &str) -> Result<String, DriveError> {
        if let Some(existing) = self.folder_named(parent_id, name) {
            return Ok(existing);
        }
        Ok(self.add_folder(parent_id, name))
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<DriveFile, DriveError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(DriveError::Api {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        let parent = self.file(parent_id);
        if parent.and_then(|p| p.meta.mime_type) != Some(FOLDER_MIME.to_string()) {
            return Err(DriveError::FolderUnusable {
                folder_id: parent_id.to_string(),
                reason: "not a folder".to_string(),
            });
        }
        let id = self.add_file(parent_id, name, mime_type, bytes);
        Ok(self.file(&id).map(|f| f.meta).unwrap())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub drive: Arc<FakeDrive>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_ttl(Duration::from_secs(900)).await
    }

    pub async fn with_ttl(ttl: Duration) -> Self {
        let store = SessionStore::connect("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();

        let drive = Arc::new(FakeDrive::default());
        // Uploads check their parent, so the output root must be a real folder entry
        drive.files.lock().unwrap().insert(
            ROOT_FOLDER.to_string(),
            StoredFile {
                meta: DriveFile {
                    id: ROOT_FOLDER.to_string(),
                    name: "eSign".to_string(),
                    mime_type: Some(FOLDER_MIME.to_string()),
                    modified_time: None,
                    web_view_link: None,
                },
                parent: String::new(),
                bytes: Vec::new(),
            },
        );
        // The ICA template is older, so picking it proves the name preference
        drive.add_file(TEMPLATE_FOLDER, "Contractor ICA.pdf", "application/pdf", template_pdf(2));
        drive.add_file(TEMPLATE_FOLDER, "Other Agreement.pdf", "application/pdf", template_pdf(1));
        drive.add_file(TEMPLATE_FOLDER, "notes.txt", "text/plain", b"hello".to_vec());

        let settings = WorkflowSettings {
            drive_folder_id: ROOT_FOLDER.to_string(),
            template_folders: TemplateFolders {
                shared: TEMPLATE_FOLDER.to_string(),
                ica: String::new(),
                nda: String::new(),
            },
            ..WorkflowSettings::default()
        };

        let state = Arc::new(AppState::new(
            store,
            Arc::new(SignatureCache::with_ttl(ttl)),
            Arc::clone(&drive) as Arc<dyn DocumentStore>,
            EventNotifier::disabled(),
            AccessPolicy::new(SECRET, vec!["example.com".to_string()]),
            settings,
        ));

        let router = router(
            Arc::clone(&state),
            Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/public")),
            10 * 1024 * 1024,
        );

        Self {
            router,
            state,
            drive,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create, open and upload a signature; returns the record id
    pub async fn ready_to_compose(&self) -> String {
        let record_id = self.init_session().await;
        let resp = self
            .send(post_json("/api/esign/session/open", &serde_json::json!({ "recordId": record_id })))
            .await;
        assert_eq!(resp.status(), 200);
        let resp = self
            .send(signature_upload(&record_id, "image/png", &signature_image(ImageFormat::Png)))
            .await;
        assert_eq!(resp.status(), 200);
        record_id
    }

    pub async fn init_session(&self) -> String {
        let resp = self
            .send(post_json("/api/esign/session/init", &serde_json::json!({})))
            .await;
        assert_eq!(resp.status(), 200);
        let body = json_body(resp).await;
        body["recordId"].as_str().unwrap().to_string()
    }
}

/// Access headers for the default signer
pub fn with_access(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder
        .header(HEADER_EMAIL, EMAIL)
        .header(HEADER_NAME, NAME)
        .header(HEADER_SECRET, SECRET)
        .header(HEADER_DOCTYPE, "ica")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    with_access(Request::builder().method("POST").uri(uri))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    with_access(Request::builder().method("GET").uri(uri))
        .body(Body::empty())
        .unwrap()
}

pub fn signature_upload(record_id: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"recordId\"\r\n\r\n{id}\r\n",
            b = BOUNDARY,
            id = record_id
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"signature\"; filename=\"sig\"\r\nContent-Type: {t}\r\n\r\n",
            b = BOUNDARY,
            t = content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    with_access(Request::builder().method("POST").uri("/api/esign/upload/signature"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn json_body(resp: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// Letter-sized PDF with `pages` pages
pub fn template_pdf(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for i in 0..pages {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            format!("BT 72 720 Td (Page {}) Tj ET", i + 1).into_bytes(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Black stroke on white paper
pub fn signature_image(format: ImageFormat) -> Vec<u8> {
    let mut img = RgbImage::from_pixel(120, 40, Rgb([250, 250, 250]));
    for x in 10..110 {
        for y in 18..22 {
            img.put_pixel(x, y, Rgb([5, 5, 5]));
        }
    }
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, format)
        .unwrap();
    buffer.into_inner()
}
