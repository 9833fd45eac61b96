//! Directory listing with filtering and totals.
//!
//! Names returned by a provider go through the fixed ignore set and the
//! optional dotfile filter before anything is stat'd, so hidden entries never
//! cost a round trip and never reach the totals.

use std::time::SystemTime;

use protocol::{DirectoryEntry, ListingSummary};
use tracing::debug;

use super::error::FsError;
use super::path::{RelPath, SERVERS_SEGMENT};
use super::provider::FilesystemProvider;
use super::upload::is_partial_upload;

/// Names never shown in a listing.
pub const IGNORED_NAMES: [&str; 15] = [
    ".bzr",
    "$RECYCLE.BIN",
    ".DAV",
    ".DS_Store",
    ".git",
    ".hg",
    ".htaccess",
    ".htpasswd",
    ".Spotlight-V100",
    ".svn",
    "__MACOSX",
    "ehthumbs.db",
    "robots.txt",
    "Thumbs.db",
    "thumbs.tps",
];

/// Whether `name` is in the fixed ignore set.
pub fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name)
}

/// Whether `name` survives the listing filters.
///
/// Ignored names and in-flight uploads are never shown.
pub fn is_visible(name: &str, hide_dotfiles: bool) -> bool {
    if is_ignored(name) || is_partial_upload(name) {
        return false;
    }
    !(hide_dotfiles && name.starts_with('.'))
}

/// List `path` through `provider`, filter, stat each survivor and accumulate totals.
///
/// Entries keep the provider's order. An entry that vanishes between listing
/// and stat (or a link that resolves nowhere usable) is skipped; any other stat
/// failure aborts the listing.
pub async fn summarize<P>(provider: &P, path: &RelPath, hide_dotfiles: bool) -> Result<ListingSummary, FsError>
where
    P: FilesystemProvider,
{
    debug!(path = %path, hide_dotfiles, "Listing directory");
    let names = provider.list_directory(path).await?;

    let mut summary = ListingSummary::new();
    for name in names {
        if !is_visible(&name, hide_dotfiles) {
            continue;
        }

        let child = path.join(&name)?;
        let meta = match provider.stat(&child).await {
            Ok(meta) => meta,
            Err(FsError::NotFound(_)) | Err(FsError::PathTraversal(_)) => {
                debug!(path = %child, "Skipping entry that cannot be resolved");
                continue;
            }
            Err(e) => return Err(e),
        };

        let entry = if meta.is_directory {
            DirectoryEntry::dir(name, meta.size, meta.mtime_secs())
        } else {
            DirectoryEntry::file(name, meta.size, meta.mtime_secs())
        };
        summary.push(entry);
    }

    debug!(
        path = %path,
        files = summary.totals.file,
        dirs = summary.totals.dir,
        size = summary.totals.size,
        "Listed directory"
    );
    Ok(summary)
}

/// Build a listing from entries that exist only in the URL namespace.
pub fn summarize_virtual<I, S>(names: I) -> ListingSummary
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    names
        .into_iter()
        .map(|name| DirectoryEntry::dir(name, 0, now))
        .collect()
}

/// The top-level listing: the user's own directory and the remote index.
pub fn root_listing(user: &str) -> ListingSummary {
    summarize_virtual([user, SERVERS_SEGMENT])
}

/// The remote index: one directory per configured host.
pub fn servers_listing(hosts: &[String]) -> ListingSummary {
    summarize_virtual(hosts.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::local::LocalProvider;
    use protocol::{EntryKind, ListingTotals};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, LocalProvider) {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::for_user(temp.path(), "test").await.unwrap();
        (temp, provider)
    }

    fn entry<'a>(summary: &'a ListingSummary, name: &str) -> Option<&'a DirectoryEntry> {
        summary.entries.iter().find(|e| e.name == name)
    }

    #[test]
    fn test_ignore_set() {
        assert_eq!(IGNORED_NAMES.len(), 15);
        assert!(is_ignored(".git"));
        assert!(is_ignored("Thumbs.db"));
        assert!(is_ignored("$RECYCLE.BIN"));
        assert!(!is_ignored("thumbs.db"));
        assert!(!is_ignored(".gitignore"));
    }

    #[test]
    fn test_is_visible() {
        assert!(is_visible("a.txt", true));
        assert!(is_visible(".secret", false));
        assert!(!is_visible(".secret", true));
        assert!(!is_visible("robots.txt", false));
        assert!(!is_visible(".upload.0f3c9a.part", false));
        assert!(is_visible(".upload.txt", false));
    }

    #[tokio::test]
    async fn test_summarize_hides_inflight_uploads() {
        let (_temp, provider) = setup().await;
        std::fs::write(provider.root().join("a.txt"), vec![0u8; 3]).unwrap();
        std::fs::write(provider.root().join(crate::files::upload::partial_upload_name()), vec![0u8; 7]).unwrap();

        let summary = summarize(&provider, &RelPath::root(), false).await.unwrap();

        assert_eq!(summary.len(), 1);
        assert_eq!(summary.totals.size, 3);
    }

    #[tokio::test]
    async fn test_summarize_without_hiding() {
        let (_temp, provider) = setup().await;
        std::fs::write(provider.root().join("a.txt"), vec![0u8; 10]).unwrap();
        std::fs::write(provider.root().join(".secret"), vec![0u8; 5]).unwrap();
        std::fs::write(provider.root().join("Thumbs.db"), vec![0u8; 99]).unwrap();

        let summary = summarize(&provider, &RelPath::root(), false).await.unwrap();

        assert_eq!(
            summary.totals,
            ListingTotals {
                file: 2,
                dir: 0,
                size: 15
            }
        );
        assert!(entry(&summary, "Thumbs.db").is_none());
        assert!(entry(&summary, ".secret").is_some());
    }

    #[tokio::test]
    async fn test_summarize_hiding_dotfiles() {
        let (_temp, provider) = setup().await;
        std::fs::write(provider.root().join("a.txt"), vec![0u8; 10]).unwrap();
        std::fs::write(provider.root().join(".secret"), vec![0u8; 5]).unwrap();
        std::fs::create_dir(provider.root().join(".git")).unwrap();
        std::fs::create_dir(provider.root().join(".config")).unwrap();

        let summary = summarize(&provider, &RelPath::root(), true).await.unwrap();

        assert_eq!(summary.len(), 1);
        assert_eq!(summary.entries[0].name, "a.txt");
        assert_eq!(
            summary.totals,
            ListingTotals {
                file: 1,
                dir: 0,
                size: 10
            }
        );
    }

    #[tokio::test]
    async fn test_summarize_git_always_hidden() {
        let (_temp, provider) = setup().await;
        std::fs::create_dir(provider.root().join(".git")).unwrap();
        std::fs::create_dir(provider.root().join(".config")).unwrap();

        let summary = summarize(&provider, &RelPath::root(), false).await.unwrap();

        assert_eq!(summary.len(), 1);
        assert_eq!(summary.entries[0].kind, EntryKind::Dir);
        assert_eq!(summary.totals.dir, 1);
    }

    #[tokio::test]
    async fn test_summarize_totals_match_entries() {
        let (_temp, provider) = setup().await;
        std::fs::create_dir(provider.root().join("docs")).unwrap();
        std::fs::write(provider.root().join("docs/a"), vec![1u8; 3]).unwrap();
        std::fs::write(provider.root().join("docs/b"), vec![1u8; 4]).unwrap();
        std::fs::create_dir(provider.root().join("docs/sub")).unwrap();

        let path = RelPath::parse("docs").unwrap();
        let summary = summarize(&provider, &path, false).await.unwrap();

        let files = summary.entries.iter().filter(|e| e.kind == EntryKind::File).count() as u64;
        let dirs = summary.entries.iter().filter(|e| e.kind == EntryKind::Dir).count() as u64;
        let size: u64 = summary.entries.iter().map(|e| e.size).sum();
        assert_eq!(summary.totals.file, files);
        assert_eq!(summary.totals.dir, dirs);
        assert_eq!(summary.totals.size, size);
        assert_eq!(files, 2);
        assert_eq!(dirs, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_summarize_skips_dangling_symlink() {
        let (_temp, provider) = setup().await;
        std::fs::write(provider.root().join("a.txt"), b"abc").unwrap();
        std::os::unix::fs::symlink(provider.root().join("gone"), provider.root().join("broken")).unwrap();

        let summary = summarize(&provider, &RelPath::root(), false).await.unwrap();

        assert_eq!(summary.len(), 1);
        assert!(entry(&summary, "broken").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_summarize_symlink_to_dir_is_dir() {
        let (_temp, provider) = setup().await;
        std::fs::create_dir(provider.root().join("real")).unwrap();
        std::os::unix::fs::symlink(provider.root().join("real"), provider.root().join("alias")).unwrap();

        let summary = summarize(&provider, &RelPath::root(), false).await.unwrap();

        assert_eq!(entry(&summary, "alias").map(|e| e.kind), Some(EntryKind::Dir));
        assert_eq!(summary.totals.dir, 2);
    }

    #[tokio::test]
    async fn test_summarize_missing_directory() {
        let (_temp, provider) = setup().await;
        let path = RelPath::parse("nope").unwrap();
        assert!(matches!(
            summarize(&provider, &path, false).await,
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_root_listing() {
        let summary = root_listing("test");
        let names: Vec<&str> = summary.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["test", "servers"]);
        assert_eq!(summary.totals.dir, 2);
        assert_eq!(summary.totals.size, 0);
    }

    #[test]
    fn test_servers_listing() {
        let hosts = vec!["127.0.0.1".to_string(), "backup:2222".to_string()];
        let summary = servers_listing(&hosts);
        assert_eq!(summary.len(), 2);
        assert!(summary.entries.iter().all(|e| e.kind == EntryKind::Dir));
    }
}
