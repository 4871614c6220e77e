use std::sync::Arc;

use axum::{Extension, Json, body::Bytes, extract::State};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use vault_db::Database;
use vault_db::models::FileRow;
use vault_types::api::{
    ArchiveFileRequest, FileListResponse, SuccessResponse, UploadFileRequest, UploadFileResponse,
};
use vault_types::models::{FileEntry, Identity};

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};
use crate::storage::ObjectStore;

/// 50 MB upload limit for decoded file contents
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// Upload, list and archive for an authorized user.
pub struct FileService {
    db: Arc<Database>,
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
    max_upload_bytes: usize,
}

impl FileService {
    pub fn new(
        db: Arc<Database>,
        store: Arc<dyn ObjectStore>,
        public_base_url: impl Into<String>,
        max_upload_bytes: usize,
    ) -> Self {
        let mut public_base_url = public_base_url.into();
        if !public_base_url.ends_with('/') {
            public_base_url.push('/');
        }
        Self {
            db,
            store,
            public_base_url,
            max_upload_bytes,
        }
    }

    /// Largest request body that can still carry a maximal upload: base64
    /// inflates by 4/3, plus room for the JSON around it.
    pub fn max_request_bytes(&self) -> usize {
        (self.max_upload_bytes / 3)
            .saturating_mul(4)
            .saturating_add(8 * 1024)
    }

    pub fn public_url(&self, storage_path: &str) -> String {
        format!("{}{}", self.public_base_url, storage_path)
    }

    pub fn list(&self, owner: &Identity) -> Result<Vec<FileEntry>, ApiError> {
        let rows = self.db.list_files_for_user(&owner.id.to_string())?;
        rows.into_iter()
            .map(|row| self.entry(row, true))
            .collect()
    }

    pub async fn upload(
        &self,
        owner: &Identity,
        req: UploadFileRequest,
    ) -> Result<FileEntry, ApiError> {
        let (Some(raw_name), Some(data)) = (
            req.file_name.filter(|n| !n.is_empty()),
            req.file_data.filter(|d| !d.is_empty()),
        ) else {
            return Err(ApiError::validation("fileName and fileData required"));
        };

        let file_name = sanitize_file_name(&raw_name)
            .ok_or_else(|| ApiError::validation("Invalid fileName"))?;

        if data.len() > self.max_request_bytes() {
            return Err(self.too_large());
        }
        let bytes = B64
            .decode(data.trim())
            .map_err(|_| ApiError::validation("Invalid base64 data"))?;
        if bytes.len() > self.max_upload_bytes {
            return Err(self.too_large());
        }

        let file_type = req
            .file_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());
        let file_id = Uuid::new_v4();
        let uploaded_at = Utc::now();
        let storage_path = format!(
            "files/{}/{}_{}/{}",
            owner.id,
            uploaded_at.format("%Y%m%d_%H%M%S"),
            file_id.simple(),
            file_name
        );
        let size = bytes.len();

        self.store
            .put(&storage_path, Bytes::from(bytes), &file_type)
            .await
            .map_err(|e| e.context(format!("{} put {}", self.store.backend(), storage_path)))?;

        let row = FileRow {
            id: file_id.to_string(),
            user_id: owner.id.to_string(),
            file_name,
            file_size: size as i64,
            file_type,
            storage_path,
            is_archived: false,
            uploaded_at,
        };

        let db = self.db.clone();
        let row = run_blocking(move || {
            db.insert_file(&row)?;
            Ok(row)
        })
        .await?;

        info!("User {} uploaded {} ({} bytes)", owner.id, row.storage_path, size);
        self.entry(row, false)
    }

    pub fn archive(&self, owner: &Identity, req: ArchiveFileRequest) -> Result<(), ApiError> {
        let file_id = req
            .file_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::validation("fileId required"))?;

        if !self.db.archive_file(&file_id, &owner.id.to_string())? {
            return Err(ApiError::NotFound("File not found".into()));
        }

        info!("User {} archived file {}", owner.id, file_id);
        Ok(())
    }

    fn entry(&self, row: FileRow, with_archived: bool) -> Result<FileEntry, ApiError> {
        let id = row
            .id
            .parse::<Uuid>()
            .map_err(|e| anyhow::anyhow!("File row {} has a malformed id: {}", row.id, e))?;

        Ok(FileEntry {
            id,
            url: self.public_url(&row.storage_path),
            name: row.file_name,
            size: row.file_size.max(0) as u64,
            file_type: row.file_type,
            uploaded: row.uploaded_at,
            archived: with_archived.then_some(row.is_archived),
        })
    }

    fn too_large(&self) -> ApiError {
        ApiError::PayloadTooLarge(format!(
            "File exceeds the {} MB limit",
            self.max_upload_bytes / (1024 * 1024)
        ))
    }
}

/// Final path component of a client-supplied name, or `None` if nothing
/// usable is left.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| ApiError::validation("Invalid request body"))
}

/// GET /files: the caller's files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<FileListResponse>, ApiError> {
    let files = run_blocking(move || state.files.list(&identity)).await?;
    Ok(Json(FileListResponse { files }))
}

/// POST /files: JSON `{fileName, fileData, fileType}` with base64 contents.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<Json<UploadFileResponse>, ApiError> {
    let req: UploadFileRequest = parse_body(&body)?;
    let file = state.files.upload(&identity, req).await?;
    Ok(Json(UploadFileResponse {
        success: true,
        file,
    }))
}

/// PUT /files: JSON `{fileId}`; marks the caller's file archived.
pub async fn archive_file(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    let req: ArchiveFileRequest = parse_body(&body)?;
    run_blocking(move || state.files.archive(&identity, req)).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    async fn service(max_upload_bytes: usize) -> (FileService, tempfile::TempDir, Identity) {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = Identity {
            id: Uuid::new_v4(),
            email: "alice@example.com".into(),
            full_name: None,
        };
        db.create_user(&owner.id.to_string(), &owner.email, "s$h", None, Utc::now())
            .unwrap();

        let store = LocalStore::new(tmp.path().to_path_buf()).await.unwrap();
        let files = FileService::new(db, Arc::new(store), "https://cdn.example.com/bucket", max_upload_bytes);
        (files, tmp, owner)
    }

    fn upload_req(name: &str, contents: &[u8]) -> UploadFileRequest {
        UploadFileRequest {
            file_name: Some(name.to_string()),
            file_data: Some(B64.encode(contents)),
            file_type: Some("text/plain".to_string()),
        }
    }

    #[tokio::test]
    async fn upload_writes_object_and_row() {
        let (files, tmp, owner) = service(DEFAULT_MAX_UPLOAD_BYTES).await;

        let entry = files.upload(&owner, upload_req("notes.txt", b"hello")).await.unwrap();
        assert_eq!(entry.name, "notes.txt");
        assert_eq!(entry.size, 5);
        assert_eq!(entry.file_type, "text/plain");
        assert!(entry.archived.is_none());

        let prefix = format!("https://cdn.example.com/bucket/files/{}/", owner.id);
        assert!(entry.url.starts_with(&prefix), "{}", entry.url);
        assert!(entry.url.ends_with(&format!("_{}/notes.txt", entry.id.simple())), "{}", entry.url);

        let key = entry.url.trim_start_matches("https://cdn.example.com/bucket/");
        assert_eq!(std::fs::read(tmp.path().join(key)).unwrap(), b"hello");

        let listed = files.list(&owner).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].archived, Some(false));
    }

    #[tokio::test]
    async fn upload_validates_input() {
        let (files, _tmp, owner) = service(DEFAULT_MAX_UPLOAD_BYTES).await;

        let missing = files.upload(&owner, UploadFileRequest::default()).await;
        assert_eq!(missing.unwrap_err().public_message(), "fileName and fileData required");

        let mut bad = upload_req("a.txt", b"x");
        bad.file_data = Some("***not base64***".into());
        let bad = files.upload(&owner, bad).await;
        assert_eq!(bad.unwrap_err().public_message(), "Invalid base64 data");

        let traversal = files.upload(&owner, upload_req("../", b"x")).await;
        assert!(matches!(traversal, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn upload_defaults_file_type_and_strips_directories() {
        let (files, _tmp, owner) = service(DEFAULT_MAX_UPLOAD_BYTES).await;
        let mut req = upload_req("../../etc/passwd", b"root");
        req.file_type = None;

        let entry = files.upload(&owner, req).await.unwrap();
        assert_eq!(entry.name, "passwd");
        assert_eq!(entry.file_type, "application/octet-stream");
        assert!(!entry.url.contains(".."));
    }

    #[tokio::test]
    async fn same_name_uploads_in_one_second_keep_both_contents() {
        let (files, tmp, owner) = service(DEFAULT_MAX_UPLOAD_BYTES).await;

        let first = files.upload(&owner, upload_req("a.txt", b"first")).await.unwrap();
        let second = files.upload(&owner, upload_req("a.txt", b"second")).await.unwrap();
        assert_ne!(first.url, second.url);

        let read = |url: &str| {
            let key = url.trim_start_matches("https://cdn.example.com/bucket/");
            std::fs::read(tmp.path().join(key)).unwrap()
        };
        assert_eq!(read(&first.url), b"first");
        assert_eq!(read(&second.url), b"second");
        assert_eq!(files.list(&owner).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let (files, _tmp, owner) = service(4).await;
        let result = files.upload(&owner, upload_req("big.bin", b"12345")).await;
        assert!(matches!(result, Err(ApiError::PayloadTooLarge(_))));
        assert!(files.list(&owner).unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_requires_ownership() {
        let (files, _tmp, owner) = service(DEFAULT_MAX_UPLOAD_BYTES).await;
        let entry = files.upload(&owner, upload_req("a.txt", b"a")).await.unwrap();

        let stranger = Identity {
            id: Uuid::new_v4(),
            email: "mallory@example.com".into(),
            full_name: None,
        };
        let req = ArchiveFileRequest {
            file_id: Some(entry.id.to_string()),
        };
        assert!(matches!(files.archive(&stranger, req), Err(ApiError::NotFound(_))));

        let req = ArchiveFileRequest {
            file_id: Some(entry.id.to_string()),
        };
        files.archive(&owner, req).unwrap();
        assert_eq!(files.list(&owner).unwrap()[0].archived, Some(true));

        let missing = files.archive(&owner, ArchiveFileRequest::default());
        assert_eq!(missing.unwrap_err().public_message(), "fileId required");
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl ObjectStore for BrokenStore {
        async fn put(&self, _key: &str, _body: Bytes, _content_type: &str) -> anyhow::Result<()> {
            anyhow::bail!("bucket unreachable")
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn store_failure_is_internal_and_writes_no_row() {
        let (healthy, _tmp, owner) = service(DEFAULT_MAX_UPLOAD_BYTES).await;
        let files = FileService::new(
            healthy.db.clone(),
            Arc::new(BrokenStore),
            "https://cdn.example.com/bucket",
            DEFAULT_MAX_UPLOAD_BYTES,
        );

        let err = files.upload(&owner, upload_req("a.txt", b"a")).await.unwrap_err();
        assert!(matches!(err, ApiError::Storage(_)));
        assert_eq!(err.public_message(), "Internal server error");
        assert!(format!("{}", err).contains("broken put files/"));
        assert!(files.list(&owner).unwrap().is_empty());
    }

    #[test]
    fn file_names_are_reduced_to_their_last_component() {
        assert_eq!(sanitize_file_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_file_name("a/b/c.txt").as_deref(), Some("c.txt"));
        assert_eq!(sanitize_file_name("C:\\Users\\x\\d.doc").as_deref(), Some("d.doc"));
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("bad\nname"), None);
    }
}
