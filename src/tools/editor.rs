//! File editor confined to the workspace root
//!
//! Supports `view`, `create`, `str_replace`, `insert` and `undo_edit`. Every
//! mutating command records the previous file content so edits can be undone
//! one at a time, per file.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::registry::{ToolError, TypedTool};
use crate::workspace::{PathError, WorkspaceRoot};

/// Error type for editor commands
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Path {0} does not exist")]
    NotFound(PathBuf),
    #[error("File already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("Path {0} is a directory and only view command is allowed")]
    IsDirectory(PathBuf),
    #[error("view_range not allowed for directories")]
    RangeOnDirectory,
    #[error("Invalid view range: {0}")]
    InvalidRange(String),
    #[error("String '{0}' not found in file")]
    NoMatch(String),
    #[error("Multiple occurrences ({count}) of '{needle}' found")]
    MultipleMatches { needle: String, count: usize },
    #[error("Invalid insert line {line}. File has {total} lines.")]
    InvalidInsertLine { line: i64, total: usize },
    #[error("No edit history available for {0}")]
    NoHistory(PathBuf),
    #[error("Parameter `{param}` is required for command: {command}")]
    MissingParameter {
        param: &'static str,
        command: &'static str,
    },
    #[error("Error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<EditorError> for ToolError {
    fn from(e: EditorError) -> Self {
        ToolError::failed("EditorError", e.to_string())
    }
}

/// The file or directory contents returned by `view`
#[derive(Debug, Clone, PartialEq)]
pub enum ViewResult {
    File(String),
    Directory(Vec<String>),
}

/// Undo entries kept per file; the oldest is dropped beyond this
pub const DEFAULT_HISTORY_DEPTH: usize = 20;

/// File editing with per-file undo history
#[derive(Debug)]
pub struct FileEditor {
    root: WorkspaceRoot,
    history: Mutex<HashMap<PathBuf, VecDeque<String>>>,
    history_depth: usize,
}

impl FileEditor {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self {
            root,
            history: Mutex::new(HashMap::new()),
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }

    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth.max(1);
        self
    }

    /// Resolve a caller path; relative paths are taken from the root
    fn resolve(&self, path: &str) -> Result<PathBuf, EditorError> {
        Ok(self.root.resolve(self.root.normalize(path))?)
    }

    fn existing_file(&self, path: &str) -> Result<PathBuf, EditorError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(EditorError::NotFound(PathBuf::from(path)));
        }
        if resolved.is_dir() {
            return Err(EditorError::IsDirectory(PathBuf::from(path)));
        }
        Ok(resolved)
    }

    fn push_history(&self, path: &Path, content: String) {
        if let Ok(mut history) = self.history.lock() {
            let entries = history.entry(path.to_path_buf()).or_default();
            entries.push_back(content);
            while entries.len() > self.history_depth {
                entries.pop_front();
            }
        }
    }

    fn pop_history(&self, path: &Path) -> Option<String> {
        self.history
            .lock()
            .ok()
            .and_then(|mut history| history.get_mut(path).and_then(VecDeque::pop_back))
    }

    /// View a file (optionally a 1-based inclusive line range, `-1` = end) or
    /// list a directory recursively
    pub async fn view(&self, path: &str, range: Option<(i64, i64)>) -> Result<ViewResult, EditorError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(EditorError::NotFound(PathBuf::from(path)));
        }

        if resolved.is_dir() {
            if range.is_some() {
                return Err(EditorError::RangeOnDirectory);
            }
            let root = resolved.clone();
            let entries = tokio::task::spawn_blocking(move || list_recursive(&root))
                .await
                .map_err(|e| EditorError::Io {
                    path: resolved.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e),
                })?
                .map_err(|source| EditorError::Io {
                    path: resolved.clone(),
                    source,
                })?;
            return Ok(ViewResult::Directory(entries));
        }

        let content = read(&resolved).await?;
        let Some((start, end)) = range else {
            return Ok(ViewResult::File(content));
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let total = lines.len() as i64;
        if start < 1 || start > total {
            return Err(EditorError::InvalidRange(format!("start line {start}")));
        }
        if end != -1 && (end < start || end > total) {
            return Err(EditorError::InvalidRange(format!("end line {end}")));
        }
        let end = if end == -1 { total } else { end };
        Ok(ViewResult::File(
            lines[(start - 1) as usize..end as usize].join("\n"),
        ))
    }

    /// Create a new file, creating parent directories as needed
    pub async fn create(&self, path: &str, content: &str) -> Result<(), EditorError> {
        let resolved = self.resolve(path)?;
        if resolved.exists() {
            return Err(EditorError::AlreadyExists(PathBuf::from(path)));
        }
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| EditorError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        write(&resolved, content).await?;
        debug!(path = %resolved.display(), bytes = content.len(), "file created");
        Ok(())
    }

    /// Replace the single occurrence of `old` with `new`
    pub async fn str_replace(&self, path: &str, old: &str, new: &str) -> Result<(), EditorError> {
        let resolved = self.existing_file(path)?;
        let content = read(&resolved).await?;
        match content.matches(old).count() {
            0 => return Err(EditorError::NoMatch(old.to_string())),
            1 => {}
            count => {
                return Err(EditorError::MultipleMatches {
                    needle: old.to_string(),
                    count,
                })
            }
        }
        let updated = content.replacen(old, new, 1);
        write(&resolved, &updated).await?;
        self.push_history(&resolved, content);
        Ok(())
    }

    /// Insert `text` after line `line` (`0` inserts at the top)
    pub async fn insert(&self, path: &str, line: i64, text: &str) -> Result<(), EditorError> {
        let resolved = self.existing_file(path)?;
        let content = read(&resolved).await?;
        let mut lines: Vec<&str> = content.split('\n').collect();
        if line < 0 || line as usize > lines.len() {
            return Err(EditorError::InvalidInsertLine {
                line,
                total: lines.len(),
            });
        }
        lines.insert(line as usize, text);
        let updated = lines.join("\n");
        write(&resolved, &updated).await?;
        self.push_history(&resolved, content);
        Ok(())
    }

    /// Restore the content from before the most recent edit
    pub async fn undo_edit(&self, path: &str) -> Result<(), EditorError> {
        let resolved = self.existing_file(path)?;
        let previous = self
            .pop_history(&resolved)
            .ok_or_else(|| EditorError::NoHistory(PathBuf::from(path)))?;
        write(&resolved, &previous).await
    }
}

async fn read(path: &Path) -> Result<String, EditorError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| EditorError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn write(path: &Path, content: &str) -> Result<(), EditorError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| EditorError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Paths below `dir`, relative to it, sorted
fn list_recursive(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if let Ok(relative) = path.strip_prefix(dir) {
                out.push(relative.display().to_string());
            }
            if entry.file_type()?.is_dir() {
                pending.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Editor commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditorCommand {
    View,
    Create,
    StrReplace,
    Insert,
    UndoEdit,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditorArgs {
    /// The command to run: view, create, str_replace, insert or undo_edit
    pub command: EditorCommand,
    /// Absolute path to the file or directory
    pub path: String,
    /// Content of the file to create (create)
    pub file_text: Option<String>,
    /// Line range [start, end] to view; -1 as end means end of file (view)
    pub view_range: Option<Vec<i64>>,
    /// Exact text to replace (str_replace)
    pub old_str: Option<String>,
    /// Replacement or inserted text (str_replace, insert)
    pub new_str: Option<String>,
    /// Line after which to insert; 0 inserts at the top (insert)
    pub insert_line: Option<i64>,
}

/// The `str_replace_editor` tool
pub struct EditorTool {
    editor: FileEditor,
}

impl EditorTool {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self {
            editor: FileEditor::new(root),
        }
    }
}

#[async_trait]
impl TypedTool for EditorTool {
    type Args = EditorArgs;

    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn description(&self) -> &str {
        "View, create and edit files inside the workspace. Commands: view (file or \
         directory), create (new file only), str_replace (exactly one occurrence), \
         insert (after a line) and undo_edit (revert the last edit of a file)."
    }

    async fn call(&self, args: EditorArgs) -> Result<Value, ToolError> {
        let path = args.path.as_str();
        let result = match args.command {
            EditorCommand::View => {
                let range = match args.view_range.as_deref() {
                    None => None,
                    Some([start, end]) => Some((*start, *end)),
                    Some(other) => {
                        return Err(EditorError::InvalidRange(format!(
                            "expected [start, end], got {} values",
                            other.len()
                        ))
                        .into())
                    }
                };
                match self.editor.view(path, range).await? {
                    ViewResult::File(content) => {
                        json!({"status": "success", "type": "file", "content": content})
                    }
                    ViewResult::Directory(contents) => {
                        json!({"status": "success", "type": "directory", "contents": contents})
                    }
                }
            }
            EditorCommand::Create => {
                let text = args.file_text.as_deref().ok_or(EditorError::MissingParameter {
                    param: "file_text",
                    command: "create",
                })?;
                self.editor.create(path, text).await?;
                json!({"status": "success", "message": format!("File created at {path}")})
            }
            EditorCommand::StrReplace => {
                let old = args.old_str.as_deref().ok_or(EditorError::MissingParameter {
                    param: "old_str",
                    command: "str_replace",
                })?;
                let new = args.new_str.as_deref().ok_or(EditorError::MissingParameter {
                    param: "new_str",
                    command: "str_replace",
                })?;
                self.editor.str_replace(path, old, new).await?;
                json!({"status": "success", "message": format!("Replaced '{old}' with '{new}'")})
            }
            EditorCommand::Insert => {
                let line = args.insert_line.ok_or(EditorError::MissingParameter {
                    param: "insert_line",
                    command: "insert",
                })?;
                let text = args.new_str.as_deref().ok_or(EditorError::MissingParameter {
                    param: "new_str",
                    command: "insert",
                })?;
                self.editor.insert(path, line, text).await?;
                json!({"status": "success", "message": format!("Inserted text at line {line}")})
            }
            EditorCommand::UndoEdit => {
                self.editor.undo_edit(path).await?;
                json!({"status": "success", "message": "Last edit undone successfully"})
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> (tempfile::TempDir, FileEditor, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let editor = FileEditor::new(WorkspaceRoot::new(&root).unwrap());
        (dir, editor, root)
    }

    fn p(root: &Path, name: &str) -> String {
        root.join(name).display().to_string()
    }

    #[tokio::test]
    async fn test_create_view_and_range() {
        let (_dir, editor, root) = editor();
        let file = p(&root, "nested/a.txt");
        editor.create(&file, "one\ntwo\nthree").await.unwrap();

        assert_eq!(
            editor.view(&file, Some((2, -1))).await.unwrap(),
            ViewResult::File("two\nthree".into())
        );
        assert_eq!(
            editor.view(&file, Some((1, 1))).await.unwrap(),
            ViewResult::File("one".into())
        );
        assert!(matches!(
            editor.view(&file, Some((0, 1))).await,
            Err(EditorError::InvalidRange(_))
        ));
        assert!(matches!(
            editor.create(&file, "again").await,
            Err(EditorError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let (_dir, editor, root) = editor();
        editor.create(&p(&root, "x/y.txt"), "").await.unwrap();
        match editor.view(&root.display().to_string(), None).await.unwrap() {
            ViewResult::Directory(entries) => {
                assert_eq!(entries, vec!["x".to_string(), "x/y.txt".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_str_replace_requires_single_match_and_undo() {
        let (_dir, editor, root) = editor();
        let file = p(&root, "f.txt");
        editor.create(&file, "a b a").await.unwrap();

        assert!(matches!(
            editor.str_replace(&file, "a", "z").await,
            Err(EditorError::MultipleMatches { count: 2, .. })
        ));
        assert!(matches!(
            editor.str_replace(&file, "q", "z").await,
            Err(EditorError::NoMatch(_))
        ));

        editor.str_replace(&file, "b", "B").await.unwrap();
        assert_eq!(std::fs::read_to_string(root.join("f.txt")).unwrap(), "a B a");

        editor.undo_edit(&file).await.unwrap();
        assert_eq!(std::fs::read_to_string(root.join("f.txt")).unwrap(), "a b a");
        assert!(matches!(
            editor.undo_edit(&file).await,
            Err(EditorError::NoHistory(_))
        ));
    }

    #[tokio::test]
    async fn test_undo_history_is_bounded() {
        let (_dir, editor, root) = editor();
        let editor = editor.with_history_depth(2);
        let file = p(&root, "f.txt");
        editor.create(&file, "v0").await.unwrap();
        for n in 1..=4 {
            editor.str_replace(&file, &format!("v{}", n - 1), &format!("v{n}")).await.unwrap();
        }

        editor.undo_edit(&file).await.unwrap();
        editor.undo_edit(&file).await.unwrap();
        assert_eq!(std::fs::read_to_string(root.join("f.txt")).unwrap(), "v2");
        assert!(matches!(
            editor.undo_edit(&file).await,
            Err(EditorError::NoHistory(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_at_top_and_bounds() {
        let (_dir, editor, root) = editor();
        let file = p(&root, "f.txt");
        editor.create(&file, "b\nc").await.unwrap();
        editor.insert(&file, 0, "a").await.unwrap();
        assert_eq!(std::fs::read_to_string(root.join("f.txt")).unwrap(), "a\nb\nc");
        assert!(matches!(
            editor.insert(&file, 9, "x").await,
            Err(EditorError::InvalidInsertLine { line: 9, total: 3 })
        ));
    }

    #[tokio::test]
    async fn test_paths_outside_root_are_rejected() {
        let (_dir, editor, root) = editor();
        let outside = root.join("..").join("escape.txt").display().to_string();
        assert!(matches!(
            editor.create(&outside, "x").await,
            Err(EditorError::Path(PathError::OutsideRoot { .. }))
        ));
    }

    #[tokio::test]
    async fn test_mutating_directory_is_rejected() {
        let (_dir, editor, root) = editor();
        std::fs::create_dir(root.join("d")).unwrap();
        assert!(matches!(
            editor.insert(&p(&root, "d"), 0, "x").await,
            Err(EditorError::IsDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_tool_reports_missing_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EditorTool::new(WorkspaceRoot::new(dir.path()).unwrap());
        let err = tool
            .call(EditorArgs {
                command: EditorCommand::Create,
                path: dir.path().join("n.txt").display().to_string(),
                file_text: None,
                view_range: None,
                old_str: None,
                new_str: None,
                insert_line: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EditorError");
        assert!(err.to_string().contains("file_text"));
    }
}
