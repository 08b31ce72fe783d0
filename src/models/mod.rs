pub mod batch;
pub mod loaders;
pub mod ocr;
pub mod order;
pub mod progress;
pub mod report;
pub mod session;

pub use batch::{
    BatchFileItem, BatchJob, BatchJobStatus, BatchSettings, FileStatus, GeneratedReport,
    ReportStatus,
};
pub use loaders::{load_manifest, load_upload_files, BatchManifest, UploadFile};
pub use ocr::{FieldWarning, OcrResult, PointValue};
pub use order::{MonthlyReport, Order, OrderPage, OrderQuery, OrderStatus};
pub use progress::{FileUpdate, ProgressEvent};
pub use report::ReportFormat;
pub use session::{ActiveTab, ProcessingMode};
