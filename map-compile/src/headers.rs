//! Companion C header readers: the asset-path resolver and the enum-name
//! resolver.
//!
//! Both collaborators are contractually external: a separate
//! header-generator script produces these headers from the same asset tree
//! this compiler reads. No C-parsing crate exists anywhere in this corpus,
//! so rather than fabricate a dependency, both readers use targeted regexes
//! against the specific, regular shapes the generator emits:
//! `typedef enum { A, B, ... } name_t;` and `const char * const
//! name_paths[] = { "rom:/path.ext", ... };`.

use crate::error::{CompileError, Result};
use anyhow::{bail, Context};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reads a single C enum typedef and assigns sequential values the way an
/// unannotated `enum { A, B, C }` does in C.
#[derive(Debug, Default)]
pub struct EnumTable {
    values: HashMap<String, u32>,
}

impl EnumTable {
    pub fn load(path: &Path, typename: &str) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading enum header {}", path.display()))?;

        let typedef_re = Regex::new(&format!(
            r"(?s)typedef\s+enum\s*\{{(?P<body>.*?)\}}\s*{}\s*;",
            regex::escape(typename)
        ))
        .unwrap();

        let Some(caps) = typedef_re.captures(&source) else {
            bail!("`{}` enum typedef not found in {}", typename, path.display());
        };
        let body = &caps["body"];

        let ident_re = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
        let mut values = HashMap::new();
        let mut counter = 0u32;
        for entry in body.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains('=') {
                bail!("explicit enum values not supported: `{}`", entry);
            }
            let Some(m) = ident_re.find(entry) else {
                continue;
            };
            values.insert(m.as_str().to_string(), counter);
            counter += 1;
        }

        Ok(EnumTable { values })
    }

    pub fn value(&self, name: &str) -> Result<u32> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnknownEnumValue(name.to_string()).into())
    }
}

/// Reads one or more `const char * const <category>_paths[] = { ... };`
/// arrays, resolving each listed `"rom:/path.ext"` literal to its relative
/// path stem so it can be matched against an input path resolved against
/// `asset_dir`.
#[derive(Debug, Default)]
pub struct AssetTable {
    groups: HashMap<String, Vec<Option<String>>>,
    asset_dir: PathBuf,
}

impl AssetTable {
    pub fn load(path: &Path, asset_dir: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading asset header {}", path.display()))?;

        let array_re =
            Regex::new(r"(?s)(?P<name>\w+)_paths\s*\[\s*\]\s*=\s*\{(?P<body>.*?)\}\s*;").unwrap();
        let path_re = Regex::new(r#""rom:/([^"]+)\.\w+""#).unwrap();
        let string_re = Regex::new(r#""[^"]*""#).unwrap();

        let mut groups = HashMap::new();
        for caps in array_re.captures_iter(&source) {
            let name = caps["name"].to_string();
            let body = &caps["body"];
            // Every generated array's first element is the `(void *) 0,`
            // `{NAME}_NONE` placeholder `genassetids.py` always writes ahead
            // of the real `"rom:/..."` entries; real assets start at index 1.
            let mut entries = vec![None];
            for s in string_re.find_iter(body) {
                let lit = s.as_str();
                let stem = path_re
                    .captures(lit)
                    .map(|c| c[1].to_string());
                entries.push(stem);
            }
            groups.insert(name, entries);
        }

        Ok(AssetTable {
            groups,
            asset_dir: asset_dir.to_path_buf(),
        })
    }

    pub fn index(&self, category: &str, asset_path: &Path) -> Result<u32> {
        let abs = if asset_path.is_absolute() {
            asset_path.to_path_buf()
        } else {
            self.asset_dir.join(asset_path)
        };
        let rel = abs
            .strip_prefix(&self.asset_dir)
            .unwrap_or(asset_path)
            .with_extension("");
        let key = rel.to_string_lossy().replace('\\', "/");

        let group = self
            .groups
            .get(category)
            .ok_or_else(|| CompileError::UnknownAsset(key.clone()))?;

        group
            .iter()
            .position(|entry| entry.as_deref() == Some(key.as_str()))
            .map(|i| i as u32)
            .ok_or_else(|| CompileError::UnknownAsset(key).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(name: &str, contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn enum_table_assigns_sequential_values() {
        let path = write_tmp(
            "mapc_test_enum.h",
            "typedef enum { AT_PLAYER, AT_ENEMY, AT_TRIGGER } actor_type_t;",
        );
        let table = EnumTable::load(&path, "actor_type_t").unwrap();
        assert_eq!(table.value("AT_PLAYER").unwrap(), 0);
        assert_eq!(table.value("AT_ENEMY").unwrap(), 1);
        assert_eq!(table.value("AT_TRIGGER").unwrap(), 2);
        assert!(table.value("AT_MISSING").is_err());
    }

    #[test]
    fn asset_table_resolves_relative_stems() {
        let path = write_tmp(
            "mapc_test_assets.h",
            r#"const char * const gfx_paths[] = {
  (void *) 0,
  "rom:/sprites/hero.png",
  "rom:/sprites/enemy.png",
};"#,
        );
        let table = AssetTable::load(&path, Path::new("/assets")).unwrap();
        let idx = table
            .index("gfx", Path::new("/assets/sprites/hero.png"))
            .unwrap();
        // index 0 is reserved by the `(void *) 0,` `{NAME}_NONE` placeholder
        // every generated header carries ahead of the real paths.
        assert_eq!(idx, 1);
        assert_eq!(
            table.index("gfx", Path::new("/assets/sprites/enemy.png")).unwrap(),
            2
        );
        assert!(table.index("gfx", Path::new("/assets/missing.png")).is_err());
    }
}
