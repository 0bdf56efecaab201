//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 与绝对路径逃逸）；
//! ReadFileTool / SaveToFileTool 基于 SafeFs，同步 I/O 经 TaskScheduler 在阻塞线程池执行。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{AgentError, TaskScheduler};
use crate::tools::{Tool, ToolOutput};

/// 沙箱文件系统：绑定根目录，校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 词法检查：只允许普通路径段与 `.`
    fn relative(&self, path: &str) -> Result<PathBuf, AgentError> {
        let rel = Path::new(path);
        let ok = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if ok {
            Ok(self.root_dir.join(rel))
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    /// 解析 directory/filename；符号链接解析后仍须在根下
    pub fn resolve(&self, directory: &str, filename: &str) -> Result<PathBuf, AgentError> {
        if filename.is_empty() || Path::new(filename).components().count() != 1 {
            return Err(AgentError::PathEscape(filename.to_string()));
        }
        let dir = self.relative(directory)?;
        let full = dir.join(filename);
        if let (Ok(canonical), Ok(root)) = (full.canonicalize(), self.root_dir.canonicalize()) {
            if !canonical.starts_with(root) {
                return Err(AgentError::PathEscape(format!("{}/{}", directory, filename)));
            }
        }
        Ok(full)
    }

    pub fn read_file(&self, directory: &str, filename: &str) -> Result<Option<String>, AgentError> {
        let path = self.resolve(directory, filename)?;
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    /// 写入文件（目录不存在则创建），返回写入路径
    pub fn write_file(&self, directory: &str, filename: &str, content: &str) -> Result<PathBuf, AgentError> {
        let path = self.resolve(directory, filename)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Create dir failed: {}", e)))?;
        }
        std::fs::write(&path, content)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(path)
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing parameter '{}'", key))
}

/// 读取工作区内的单个文件（不支持通配符）
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    fs: SafeFs,
    scheduler: TaskScheduler,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>, scheduler: TaskScheduler) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            scheduler,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "ReadFileTool"
    }

    fn description(&self) -> &str {
        "Read one file from the given directory with the given filename. No wildcard usage possible."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string" },
                "directory": { "type": "string" }
            },
            "required": ["filename", "directory"]
        })
    }

    async fn run(&self, args: Value) -> Result<ToolOutput, String> {
        let filename = str_arg(&args, "filename")?.to_string();
        let directory = str_arg(&args, "directory")?.to_string();
        tracing::info!(directory = %directory, filename = %filename, "read file tool execute");
        let fs = self.fs.clone();
        let (dir, name) = (directory.clone(), filename.clone());
        let content = self
            .scheduler
            .run_blocking(move || fs.read_file(&dir, &name))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
        Ok(match content {
            Some(text) => ToolOutput::completed(text),
            None => ToolOutput::incomplete(format!("{}/{} does not exist.", directory, filename)),
        })
    }

    fn clone_tool(&self) -> Box<dyn Tool> {
        Box::new(self.clone())
    }
}

/// 将生成的内容保存到工作区内的文件
#[derive(Debug, Clone)]
pub struct SaveToFileTool {
    fs: SafeFs,
    scheduler: TaskScheduler,
}

impl SaveToFileTool {
    pub fn new(root_dir: impl AsRef<Path>, scheduler: TaskScheduler) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            scheduler,
        }
    }
}

#[async_trait]
impl Tool for SaveToFileTool {
    fn name(&self) -> &str {
        "SaveToFileTool"
    }

    fn description(&self) -> &str {
        "Save generated content to the given directory with the given filename."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "txt": { "type": "string" },
                "filename": { "type": "string" },
                "directory": { "type": "string" }
            },
            "required": ["txt", "filename", "directory"]
        })
    }

    async fn run(&self, args: Value) -> Result<ToolOutput, String> {
        let txt = str_arg(&args, "txt")?.to_string();
        let filename = str_arg(&args, "filename")?.to_string();
        let directory = str_arg(&args, "directory")?.to_string();
        tracing::info!(directory = %directory, filename = %filename, "save file tool execute");
        let fs = self.fs.clone();
        let written = self
            .scheduler
            .run_blocking(move || fs.write_file(&directory, &filename, &txt))
            .await
            .map_err(|e| e.to_string())?;
        Ok(match written {
            Ok(path) => ToolOutput::completed(format!("Solution: {}", path.display())),
            Err(AgentError::PathEscape(p)) => return Err(format!("Path escape attempt: {}", p)),
            Err(e) => ToolOutput::incomplete(format!("An error occurred: {}", e)),
        })
    }

    fn clone_tool(&self) -> Box<dyn Tool> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_then_read() {
        let dir = TempDir::new().unwrap();
        let scheduler = TaskScheduler::new(1);
        let save = SaveToFileTool::new(dir.path(), scheduler.clone());
        let out = save
            .run(serde_json::json!({"txt": "hello", "filename": "a.md", "directory": "out"}))
            .await
            .unwrap();
        assert!(out.completed);
        assert!(out.result.starts_with("Solution: "));
        assert!(dir.path().join("out/a.md").exists());

        let read = ReadFileTool::new(dir.path(), scheduler);
        let out = read
            .run(serde_json::json!({"filename": "a.md", "directory": "out"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::completed("hello"));
    }

    #[tokio::test]
    async fn test_read_missing_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let read = ReadFileTool::new(dir.path(), TaskScheduler::new(1));
        let out = read
            .run(serde_json::json!({"filename": "nope.txt", "directory": "."}))
            .await
            .unwrap();
        assert!(!out.completed);
        assert!(out.result.ends_with("does not exist."));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let save = SaveToFileTool::new(dir.path(), TaskScheduler::new(1));
        let err = save
            .run(serde_json::json!({"txt": "x", "filename": "p", "directory": "../outside"}))
            .await
            .unwrap_err();
        assert!(err.contains("Path escape"));

        let read = ReadFileTool::new(dir.path(), TaskScheduler::new(1));
        assert!(read
            .run(serde_json::json!({"filename": "../../etc/passwd", "directory": "."}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let dir = TempDir::new().unwrap();
        let read = ReadFileTool::new(dir.path(), TaskScheduler::new(1));
        let err = read.run(serde_json::json!({"filename": "a"})).await.unwrap_err();
        assert!(err.contains("directory"));
    }
}
