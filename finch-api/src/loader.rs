//! 文件系统模块加载器
//!
//! 规范名是相对于搜索路径的 `/` 分隔路径（不带扩展名）。
//! `./` 与 `../` 开头的导入相对于导入者所在目录解析，其余相对于搜索路径根目录。
//! 所有名字都会折叠 `.` 与 `..`，不能离开根目录。

use finch_core::{Configuration, LoadedModule};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// 依次尝试的源文件扩展名
pub const EXTENSIONS: [&str; 2] = ["finch", "wren"];

#[derive(Debug, Clone, Default)]
pub struct ModuleLoader {
    paths: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// 把导入请求规范化；绝对路径或越过根目录时返回 None
    pub fn resolve(&self, importer: &str, name: &str) -> Option<String> {
        let rooted = Path::new(name)
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)));
        if name.is_empty() || rooted || name.starts_with('/') {
            debug!(target: "finch::module", importer, name, "rejected absolute import");
            return None;
        }

        let mut parts: Vec<&str> = Vec::new();
        if name.starts_with("./") || name.starts_with("../") {
            parts.extend(importer.split('/'));
            // 去掉导入者自身，只保留目录部分
            parts.pop();
        }
        for segment in name.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        debug!(target: "finch::module", importer, name, "import escapes the search root");
                        return None;
                    }
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            return None;
        }
        let canonical = parts.join("/");
        trace!(target: "finch::module", importer, name, canonical = %canonical, "resolved import");
        Some(canonical)
    }

    /// 在搜索路径中查找 `name.finch` 或 `name.wren`
    pub fn load(&self, name: &str) -> Option<LoadedModule> {
        for dir in &self.paths {
            for ext in EXTENSIONS {
                let path = dir.join(format!("{name}.{ext}"));
                match std::fs::read_to_string(&path) {
                    Ok(source) => {
                        debug!(target: "finch::module", module = name, path = %path.display(), "loaded module source");
                        return Some(LoadedModule::new(source));
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        debug!(target: "finch::module", path = %path.display(), error = %err, "failed to read module");
                    }
                }
            }
        }
        debug!(target: "finch::module", module = name, "module not found on search path");
        None
    }

    /// 安装解析与加载回调
    pub fn install(self, config: Configuration) -> Configuration {
        let resolver = self.clone();
        config
            .with_resolve_module_fn(move |importer, name| resolver.resolve(importer, name))
            .with_load_module_fn(move |name| self.load(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("finch-loader-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_resolve_bare_name_is_unchanged() {
        let loader = ModuleLoader::default();
        assert_eq!(loader.resolve("pkg/a", "json").as_deref(), Some("json"));
    }

    #[test]
    fn test_resolve_relative_names() {
        let loader = ModuleLoader::default();
        assert_eq!(loader.resolve("main", "./util").as_deref(), Some("util"));
        assert_eq!(loader.resolve("pkg/a", "./b").as_deref(), Some("pkg/b"));
        assert_eq!(loader.resolve("pkg/sub/a", "../b").as_deref(), Some("pkg/b"));
        assert_eq!(loader.resolve("main", "../escape"), None);
    }

    #[test]
    fn test_resolve_normalizes_bare_names() {
        let loader = ModuleLoader::default();
        assert_eq!(loader.resolve("main", "a/./b").as_deref(), Some("a/b"));
        assert_eq!(loader.resolve("main", "a/x/../b").as_deref(), Some("a/b"));
        assert_eq!(loader.resolve("main", "a/../../x"), None);
        assert_eq!(loader.resolve("pkg/deep/a", "a/../../x"), None);
        assert_eq!(loader.resolve("main", ".."), None);
    }

    #[test]
    fn test_resolve_rejects_absolute_names() {
        let loader = ModuleLoader::default();
        assert_eq!(loader.resolve("main", "/etc/x"), None);
        assert_eq!(loader.resolve("pkg/a", "//x"), None);
        assert_eq!(loader.resolve("main", ""), None);
    }

    #[test]
    fn test_load_searches_paths_in_order() {
        let first = temp_dir("first");
        let second = temp_dir("second");
        fs::write(second.join("util.wren"), "var Where = \"second\"").unwrap();
        let loader = ModuleLoader::new(vec![first.clone(), second.clone()]);
        assert_eq!(loader.load("util").unwrap().source, "var Where = \"second\"");

        fs::write(first.join("util.finch"), "var Where = \"first\"").unwrap();
        assert_eq!(loader.load("util").unwrap().source, "var Where = \"first\"");
        assert!(loader.load("missing").is_none());

        let _ = fs::remove_dir_all(first);
        let _ = fs::remove_dir_all(second);
    }

    #[test]
    fn test_loads_nested_module() {
        let root = temp_dir("nested");
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/b.finch"), "").unwrap();
        let loader = ModuleLoader::new(vec![root.clone()]);
        let name = loader.resolve("pkg/a", "./b").unwrap();
        assert!(loader.load(&name).is_some());
        let _ = fs::remove_dir_all(root);
    }
}
