use crate::error::{AppError, FileError};
use crate::models::BatchSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 上传目录中可选的批次清单文件名
pub const MANIFEST_FILE: &str = "batch.toml";

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 待上传的检测报告照片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

impl UploadFile {
    /// 根据扩展名推断 MIME 类型
    pub fn mime_type(&self) -> &'static str {
        match extension_of(&self.path).as_deref() {
            Some("png") => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// 批次清单（batch.toml）
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BatchManifest {
    pub name: String,
    #[serde(default)]
    pub settings: BatchSettings,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// 读取目录中的批次清单，不存在时返回 None
pub async fn load_manifest(folder: &Path) -> Result<Option<BatchManifest>> {
    let manifest_path = folder.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&manifest_path)
        .await
        .with_context(|| format!("无法读取批次清单: {}", manifest_path.display()))?;

    let manifest: BatchManifest = toml::from_str(&content)
        .with_context(|| format!("无法解析批次清单: {}", manifest_path.display()))?;

    Ok(Some(manifest))
}

/// 扫描文件夹中的所有图片，按文件名排序
pub async fn load_upload_files(folder_path: &str) -> Result<Vec<UploadFile>> {
    let folder = PathBuf::from(folder_path);

    if !folder.is_dir() {
        return Err(AppError::File(FileError::DirectoryNotFound {
            path: folder_path.to_string(),
        })
        .into());
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = extension_of(&path)
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("读取文件信息失败 {}: {}", path.display(), e);
                continue;
            }
        };

        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        tracing::debug!("发现图片: {} ({} 字节)", filename, metadata.len());

        files.push(UploadFile {
            path,
            filename,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_upload_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.JPG"), b"jpg").unwrap();
        std::fs::write(dir.path().join("a.png"), b"png!").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = load_upload_files(dir.path().to_str().unwrap()).await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.JPG"]);
        assert_eq!(files[0].size, 4);
        assert_eq!(files[0].mime_type(), "image/png");
        assert_eq!(files[1].mime_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn test_missing_folder_is_an_error() {
        let err = load_upload_files("/definitely/not/here").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::File(FileError::DirectoryNotFound { path })) if path == "/definitely/not/here"
        ));

        // 普通文件不能作为上传目录
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"jpg").unwrap();
        assert!(load_upload_files(file.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_manifest_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_manifest(dir.path()).await.unwrap().is_none());

        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "name = \"城南小区\"\n[settings]\nuse_multi_ocr = true\n",
        )
        .unwrap();
        let manifest = load_manifest(dir.path()).await.unwrap().unwrap();
        assert_eq!(manifest.name, "城南小区");
        assert!(manifest.settings.use_multi_ocr);
        assert_eq!(manifest.settings.ocr_count, 3);
        assert!(!manifest.settings.auto_start);
    }
}
