pub mod upload_loader;

pub use upload_loader::{load_manifest, load_upload_files, BatchManifest, UploadFile};
