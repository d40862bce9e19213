//! # volctl - Volume Maintenance Tool
//!
//! A one-shot command-line tool for inspecting and repairing volume file
//! pairs. Takes a single command argument, executes it against the volume
//! named by the environment, and prints results to stdout.
//!
//! ## Commands
//!
//! ```text
//! list      Print one line per live needle (key, name, size, gzip, mime)
//! export    Write each live needle's payload to a file under VOL_OUT
//! check     Verify every data record and the index; exit nonzero on corruption
//! rebuild   Rebuild the .idx file from the .dat file
//! compact   Rewrite the volume, dropping dead records
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! VOL_DIR          Directory holding the volume files  (default: ".")
//! VOL_COLLECTION   Collection name                     (default: "")
//! VOL_ID           Volume id                           (required)
//! VOL_MAP          Needle map kind: memory | compact   (default: "memory")
//! VOL_NAME_FORMAT  Export filename template            (default: "{mime}/{id}:{name}")
//! VOL_NEWER_UNIX   Only list/export needles whose last-modified stamp is
//!                  at or after this unix time          (default: unset)
//! VOL_OUT          Output directory for export         (default: "export")
//! ```
//!
//! The filename template substitutes `{name}`, `{id}`, `{mime}`, and
//! `{key}` (the full file id string). Gzipped payloads get a `.gz` suffix
//! when the rendered name lacks one.
//!
//! ## Example
//!
//! ```text
//! $ VOL_DIR=/data VOL_ID=234 volctl list
//! key=234,2adeadbeef Name=h.txt Size=5 gzip=false mime=text/plain
//! (1 live needles)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use index::IndexReader;
use needle::{FileId, Needle, VolumeId};
use needlemap::{NeedleMap, NeedleMapKind, load_needle_map};
use volume::{
    ScanNext, ScanOptions, compact_volume, idx_path, rebuild_index, scan_volume_file,
};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

struct Config {
    dir: PathBuf,
    collection: String,
    id: VolumeId,
    kind: NeedleMapKind,
    name_format: String,
    newer_unix: Option<u64>,
    out: PathBuf,
}

impl Config {
    fn from_env() -> Result<Self> {
        let id_str = std::env::var("VOL_ID").context("VOL_ID must be set to a volume id")?;
        let id: VolumeId = id_str
            .parse()
            .with_context(|| format!("VOL_ID {:?} is not a volume id", id_str))?;

        let kind = match env_or("VOL_MAP", "memory").as_str() {
            "memory" => NeedleMapKind::Memory,
            "compact" => NeedleMapKind::Compact,
            other => bail!("VOL_MAP {:?} is not one of: memory, compact", other),
        };

        let newer_unix = match std::env::var("VOL_NEWER_UNIX") {
            Ok(v) => Some(
                v.parse::<u64>()
                    .with_context(|| format!("VOL_NEWER_UNIX {:?} is not a unix time", v))?,
            ),
            Err(_) => None,
        };

        Ok(Config {
            dir: PathBuf::from(env_or("VOL_DIR", ".")),
            collection: env_or("VOL_COLLECTION", ""),
            id,
            kind,
            name_format: env_or("VOL_NAME_FORMAT", "{mime}/{id}:{name}"),
            newer_unix,
            out: PathBuf::from(env_or("VOL_OUT", "export")),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let command = match std::env::args().nth(1) {
        Some(c) => c,
        None => {
            eprintln!("usage: volctl <list|export|check|rebuild|compact>");
            eprintln!("       volume selection via VOL_DIR, VOL_COLLECTION, VOL_ID");
            std::process::exit(2);
        }
    };
    let cfg = Config::from_env()?;

    match command.as_str() {
        "list" => list(&cfg),
        "export" => export(&cfg),
        "check" => check(&cfg),
        "rebuild" => rebuild(&cfg),
        "compact" => compact(&cfg),
        other => {
            eprintln!("unknown command: {}", other);
            std::process::exit(2);
        }
    }
}

/// Walks the volume in file order, invoking `visit` for every needle that
/// is live per the on-disk index and passes the `newer` filter. Returns
/// the number visited.
fn walk_live<F>(cfg: &Config, read_body: bool, mut visit: F) -> Result<u64>
where
    F: FnMut(&Needle, FileId) -> Result<()>,
{
    let idx = idx_path(&cfg.dir, &cfg.collection, cfg.id);
    let mut map = cfg.kind.new_map();
    let mut idx_reader =
        IndexReader::open(&idx).with_context(|| format!("open index {}", idx.display()))?;
    load_needle_map(&mut idx_reader, map.as_mut())
        .with_context(|| format!("replay index {}", idx.display()))?;

    let opts = ScanOptions {
        read_needle_body: read_body,
        cancel: None,
    };
    let mut visited = 0u64;
    let mut visit_err = None;
    scan_volume_file(
        &cfg.dir,
        &cfg.collection,
        cfg.id,
        &opts,
        |_| Ok(()),
        |n, offset| {
            let live = map
                .get(n.id)
                .is_some_and(|v| v.size > 0 && v.byte_offset() == offset);
            if !live {
                debug!(id = n.id, offset, "skipping deleted or superseded needle");
                return Ok(ScanNext::Continue);
            }
            if let Some(cutoff) = cfg.newer_unix {
                if n.has_last_modified() && n.last_modified < cutoff {
                    debug!(id = n.id, n.last_modified, cutoff, "skipping old needle");
                    return Ok(ScanNext::Continue);
                }
            }
            let fid = FileId::new(cfg.id, n.id, n.cookie);
            match visit(n, fid) {
                Ok(()) => {
                    visited += 1;
                    Ok(ScanNext::Continue)
                }
                Err(e) => {
                    visit_err = Some(e);
                    Ok(ScanNext::Stop)
                }
            }
        },
    )?;
    if let Some(e) = visit_err {
        return Err(e);
    }
    Ok(visited)
}

fn list(cfg: &Config) -> Result<()> {
    let count = walk_live(cfg, false, |n, fid| {
        println!(
            "key={} Name={} Size={} gzip={} mime={}",
            fid,
            String::from_utf8_lossy(&n.name),
            n.size,
            n.is_gzipped(),
            String::from_utf8_lossy(&n.mime),
        );
        Ok(())
    })?;
    println!("({} live needles)", count);
    Ok(())
}

fn export(cfg: &Config) -> Result<()> {
    fs::create_dir_all(&cfg.out)
        .with_context(|| format!("create output directory {}", cfg.out.display()))?;

    let count = walk_live(cfg, true, |n, fid| {
        let mut name = render_name(
            &cfg.name_format,
            &String::from_utf8_lossy(&n.name),
            n.id,
            &String::from_utf8_lossy(&n.mime),
            &fid.to_string(),
        );
        if n.is_gzipped() && !name.ends_with(".gz") {
            name.push_str(".gz");
        }
        let path = cfg.out.join(sanitize_rel_path(&name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &n.data).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    })?;
    println!("exported {} needles to {}", count, cfg.out.display());
    Ok(())
}

fn check(cfg: &Config) -> Result<()> {
    // index side: every complete entry must replay
    let idx = idx_path(&cfg.dir, &cfg.collection, cfg.id);
    let mut entries = 0u64;
    let mut idx_reader =
        IndexReader::open(&idx).with_context(|| format!("open index {}", idx.display()))?;
    if let Err(e) = idx_reader.replay(|_| entries += 1) {
        bail!("index {}: {}", idx.display(), e);
    }

    // data side: every record must decode with a matching checksum
    let opts = ScanOptions {
        read_needle_body: true,
        cancel: None,
    };
    let mut records = 0u64;
    scan_volume_file(
        &cfg.dir,
        &cfg.collection,
        cfg.id,
        &opts,
        |_| Ok(()),
        |_, _| {
            records += 1;
            Ok(ScanNext::Continue)
        },
    )?;

    println!("ok: {} data records, {} index entries", records, entries);
    Ok(())
}

fn rebuild(cfg: &Config) -> Result<()> {
    let count = rebuild_index(&cfg.dir, &cfg.collection, cfg.id)?;
    println!("rebuilt index with {} entries", count);
    Ok(())
}

fn compact(cfg: &Config) -> Result<()> {
    let outcome = compact_volume(&cfg.dir, &cfg.collection, cfg.id, cfg.kind)?;
    println!(
        "compacted: kept {} needles, reclaimed {} bytes",
        outcome.copied, outcome.reclaimed_bytes
    );
    Ok(())
}

/// Renders the export filename template. Supported placeholders:
/// `{name}`, `{id}`, `{mime}`, `{key}`.
fn render_name(template: &str, name: &str, id: u64, mime: &str, key: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{id}", &id.to_string())
        .replace("{mime}", mime)
        .replace("{key}", key)
}

/// Keeps a rendered name inside the output directory: strips leading
/// separators and any `..` components.
fn sanitize_rel_path(name: &str) -> PathBuf {
    Path::new(name)
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_all_fields() {
        let name = render_name("{mime}/{id}:{name}", "h.txt", 42, "text/plain", "1,2adeadbeef");
        assert_eq!(name, "text/plain/42:h.txt");

        let name = render_name("{key}", "ignored", 1, "", "3,100000001");
        assert_eq!(name, "3,100000001");
    }

    #[test]
    fn template_without_placeholders_is_literal() {
        assert_eq!(render_name("fixed", "n", 1, "m", "k"), "fixed");
    }

    #[test]
    fn sanitize_strips_escapes() {
        assert_eq!(sanitize_rel_path("/etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(sanitize_rel_path("../../x"), PathBuf::from("x"));
        assert_eq!(sanitize_rel_path("a/b.txt"), PathBuf::from("a/b.txt"));
    }

    #[test]
    fn env_or_falls_back() {
        assert_eq!(env_or("VOLCTL_TEST_UNSET_VAR", "fallback"), "fallback");
    }
}
