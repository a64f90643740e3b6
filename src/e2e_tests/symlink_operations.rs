//! Tests for creating and reading symlinks under each scheme

use super::{MockConfig, TestContext};
use crate::client::{encode_xsym, Share, ShareConfig, SymlinkScheme, XSYM_FILE_SIZE};
use crate::error::Error;
use crate::protocol::constants::{
    info_level, trans2, SmbCommand, ADMINISTRATORS_SID, IO_REPARSE_TAG_SYMLINK,
};
use crate::protocol::messages::Sid;

const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;

fn admin_config() -> MockConfig {
    let admins: Sid = ADMINISTRATORS_SID.parse().unwrap();
    MockConfig {
        reparse_points: true,
        whoami_sids: Some(vec![admins]),
        ..Default::default()
    }
}

/// A second mount of the same server, with nothing cached
async fn remount(ctx: &TestContext) -> Share {
    let share = Share::new(ctx.server.clone(), ShareConfig::default());
    share.discover_capabilities().await.unwrap();
    share
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unix_extension_symlink() {
        let config = MockConfig {
            unix: true,
            ..Default::default()
        };
        let ctx = TestContext::new(config).await.unwrap();
        assert_eq!(ctx.share.symlink_scheme(), SymlinkScheme::Unix);

        let node = ctx
            .share
            .create_symlink("\\", "current", "releases/v2")
            .await
            .unwrap();
        assert_eq!(
            ctx.server.file("\\current").unwrap().link_target.as_deref(),
            Some("releases/v2")
        );
        assert_eq!(ctx.share.read_symlink(&node).await.unwrap(), "releases/v2");
        assert_eq!(
            ctx.server
                .count_trans2(trans2::QUERY_PATH_INFORMATION, Some(info_level::QUERY_FILE_UNIX_LINK)),
            0
        );

        let other = remount(&ctx).await;
        let node = other.lookup("\\current").await.unwrap();
        assert!(other.getattr(&node).await.unwrap().is_symlink());
        assert_eq!(other.read_symlink(&node).await.unwrap(), "releases/v2");
        assert_eq!(
            ctx.server
                .count_trans2(trans2::QUERY_PATH_INFORMATION, Some(info_level::QUERY_FILE_UNIX_LINK)),
            1
        );
    }

    #[tokio::test]
    async fn test_reparse_point_symlink() {
        let ctx = TestContext::new(admin_config()).await.unwrap();
        assert_eq!(ctx.share.symlink_scheme(), SymlinkScheme::Reparse);

        ctx.share
            .create_symlink("\\", "link", "..\\shared\\lib")
            .await
            .unwrap();
        assert!(ctx.server.file("\\link").unwrap().reparse.is_some());
        assert_eq!(ctx.server.open_fids(), 0);

        let other = remount(&ctx).await;
        let node = other.lookup("\\link").await.unwrap();
        assert_eq!(other.read_symlink(&node).await.unwrap(), "..\\shared\\lib");
        assert_eq!(ctx.server.open_fids(), 0);
    }

    #[tokio::test]
    async fn test_refused_reparse_falls_back_to_symlink_file() {
        let config = MockConfig {
            reparse_denied: true,
            ..admin_config()
        };
        let ctx = TestContext::new(config).await.unwrap();

        ctx.share
            .create_symlink("\\", "first", "/opt/app")
            .await
            .unwrap();
        assert_eq!(ctx.share.symlink_scheme(), SymlinkScheme::LegacyEmbedded);
        let file = ctx.server.file("\\first").unwrap();
        assert_eq!(file.data.len(), XSYM_FILE_SIZE);
        assert!(file.data.starts_with(b"XSym\n0008\n"));

        // the share stays on symlink files
        ctx.share
            .create_symlink("\\", "second", "/opt/other")
            .await
            .unwrap();
        assert_eq!(ctx.server.count(SmbCommand::NtTransact), 1);
        assert_eq!(ctx.server.open_fids(), 0);

        // rediscovery does not bring the refused scheme back
        ctx.share.discover_capabilities().await.unwrap();
        assert_eq!(ctx.share.symlink_scheme(), SymlinkScheme::LegacyEmbedded);
        ctx.share
            .create_symlink("\\", "third", "/opt/third")
            .await
            .unwrap();
        assert_eq!(ctx.server.count(SmbCommand::NtTransact), 1);

        let other = remount(&ctx).await;
        let node = other.lookup("\\second").await.unwrap();
        assert_eq!(other.read_symlink(&node).await.unwrap(), "/opt/other");
    }

    #[tokio::test]
    async fn test_reparse_tag_decides_symlink() {
        let ctx = TestContext::new(admin_config()).await.unwrap();
        ctx.share
            .create_symlink("\\", "link", "target.txt")
            .await
            .unwrap();
        let listed = ctx.share.list_dir("\\").await.unwrap();
        let link = listed.iter().find(|e| e.name == "link").unwrap();
        assert_eq!(link.attrs.reparse_tag, IO_REPARSE_TAG_SYMLINK);

        // a junction is a reparse point but not a link
        let mut junction = IO_REPARSE_TAG_MOUNT_POINT.to_le_bytes().to_vec();
        junction.extend_from_slice(&[0; 8]);
        ctx.server.add_dir("\\mnt");
        ctx.server.set_reparse("\\mnt", &junction);
        let node = ctx.share.lookup("\\mnt").await.unwrap();
        assert!(matches!(
            ctx.share.read_symlink(&node).await,
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(node.cached_attrs().unwrap().reparse_tag, IO_REPARSE_TAG_MOUNT_POINT);
        assert_eq!(ctx.server.open_fids(), 0);

        // once the tag is known the server is not asked again
        let transacts = ctx.server.count(SmbCommand::NtTransact);
        assert!(ctx.share.read_symlink(&node).await.is_err());
        assert_eq!(ctx.server.count(SmbCommand::NtTransact), transacts);
    }

    #[tokio::test]
    async fn test_symlink_file_validation() {
        let ctx = TestContext::new(MockConfig::default()).await.unwrap();
        assert_eq!(ctx.share.symlink_scheme(), SymlinkScheme::LegacyEmbedded);

        let mut corrupt = encode_xsym("/etc/passwd").unwrap();
        corrupt[20] = if corrupt[20] == b'a' { b'b' } else { b'a' };
        ctx.server.add_file("\\corrupt", &corrupt);
        let node = ctx.share.lookup("\\corrupt").await.unwrap();
        assert!(matches!(
            ctx.share.read_symlink(&node).await,
            Err(Error::ParseError(_))
        ));

        ctx.server.add_file("\\plain", b"just a file");
        let node = ctx.share.lookup("\\plain").await.unwrap();
        assert!(matches!(
            ctx.share.read_symlink(&node).await,
            Err(Error::InvalidParameter(_))
        ));

        ctx.server
            .add_file("\\good", &encode_xsym("/etc/hosts").unwrap());
        let node = ctx.share.lookup("\\good").await.unwrap();
        assert_eq!(ctx.share.read_symlink(&node).await.unwrap(), "/etc/hosts");

        // a second read is served from the cache
        let reads = ctx.server.count(SmbCommand::ReadAndX);
        assert_eq!(ctx.share.read_symlink(&node).await.unwrap(), "/etc/hosts");
        assert_eq!(ctx.server.count(SmbCommand::ReadAndX), reads);
        assert_eq!(ctx.server.count(SmbCommand::NtTransact), 0);
    }
}
