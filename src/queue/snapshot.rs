use std::path::Path;
use serde::Serialize;
use serde::de::DeserializeOwned;
use super::errors::Result;
use super::types::UploadRecord;

/// 保存队列的描述性快照（不含照片数据）
pub async fn save_snapshot<D: Serialize>(path: &Path, records: &[UploadRecord<D>]) -> Result<()> {
    let data = serde_json::to_string_pretty(records)?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, data).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    Ok(())
}

/// 读取快照，文件不存在时返回空
pub async fn load_snapshot<D: DeserializeOwned>(path: &Path) -> Result<Vec<UploadRecord<D>>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }

    let data = tokio::fs::read_to_string(path).await?;
    let records = serde_json::from_str(&data)?;

    Ok(records)
}
