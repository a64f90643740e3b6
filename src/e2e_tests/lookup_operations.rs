//! Tests for metadata queries at each level, attribute caching and stream checks

use super::mock_server::base_time;
use super::{MockConfig, TestContext};
use crate::attributes::{BasicSetInfo, FileKind, UnixSetInfo};
use crate::client::{ShareConfig, FINDER_INFO_STREAM, RESOURCE_FORK_STREAM};
use crate::error::Error;
use crate::protocol::constants::{info_level, trans2, Dialect, DosAttributes, SmbCommand};
use chrono::{TimeZone, Utc};
use std::time::Duration;

fn path_queries(ctx: &TestContext) -> usize {
    ctx.server.count_trans2(trans2::QUERY_PATH_INFORMATION, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_at_nt_level() {
        let ctx = TestContext::new(MockConfig::default()).await.unwrap();
        ctx.server.add_dir("\\docs");
        ctx.server.add_file("\\docs\\readme", b"hello world");

        let node = ctx.share.lookup("\\docs\\readme").await.unwrap();
        let attrs = node.cached_attrs().unwrap();
        assert_eq!(attrs.kind, FileKind::Regular);
        assert_eq!(attrs.size, 11);
        assert_eq!(attrs.write_time, base_time());
        assert_eq!(attrs.create_time, base_time());
        assert!(attrs.dos_attributes.contains(DosAttributes::ARCHIVE));
        assert_eq!(
            ctx.server
                .count_trans2(trans2::QUERY_PATH_INFORMATION, Some(info_level::QUERY_FILE_ALL_INFO)),
            1
        );

        let dir = ctx.share.lookup("\\docs").await.unwrap();
        assert!(dir.cached_attrs().unwrap().is_dir());

        let err = ctx.share.lookup("\\docs\\missing").await.unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_at_legacy_level() {
        let config = MockConfig {
            dialect: Dialect::LanMan21,
            ..Default::default()
        };
        let ctx = TestContext::new(config).await.unwrap();
        ctx.server.add_file("\\old.dat", b"12345");

        let attrs = ctx.share.query_path_info("\\old.dat").await.unwrap();
        assert_eq!(attrs.size, 5);
        assert_eq!(attrs.write_time, base_time());
        assert_eq!(attrs.access_time, attrs.write_time);
        assert_eq!(attrs.change_time, attrs.write_time);
        assert_eq!(ctx.server.count(SmbCommand::QueryInformation), 1);
        assert_eq!(path_queries(&ctx), 0);
    }

    #[tokio::test]
    async fn test_lookup_with_unix_extensions() {
        let config = MockConfig {
            unix: true,
            ..Default::default()
        };
        let ctx = TestContext::new(config).await.unwrap();
        ctx.server.add_file("\\script.sh", b"#!/bin/sh\n");
        let node = ctx.share.lookup("\\script.sh").await.unwrap();
        let unix = node.cached_attrs().unwrap().unix.unwrap();
        assert_eq!(unix.mode & 0o777, 0o644);
        assert_eq!(unix.uid, 1000);

        let change = UnixSetInfo {
            mode: Some(0o755),
            ..Default::default()
        };
        ctx.share.set_unix_metadata(&node, &change).await.unwrap();
        assert!(node.cached_attrs().is_none());
        assert_eq!(ctx.server.file("\\script.sh").unwrap().mode(), 0o755);
        let unix = ctx.share.getattr(&node).await.unwrap().unix.unwrap();
        assert_eq!(unix.mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_unix_metadata_needs_extensions() {
        let ctx = TestContext::new(MockConfig::default()).await.unwrap();
        ctx.server.add_file("\\f", b"");
        let node = ctx.share.lookup("\\f").await.unwrap();
        let err = ctx
            .share
            .set_unix_metadata(&node, &UnixSetInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_getattr_cache() {
        let ctx = TestContext::new(MockConfig::default()).await.unwrap();
        ctx.server.add_file("\\f", b"abc");
        let node = ctx.share.lookup("\\f").await.unwrap();
        let queries = path_queries(&ctx);

        ctx.server.touch("\\f", b"abcdef");
        // still fresh, so the server change is not seen yet
        assert_eq!(ctx.share.getattr(&node).await.unwrap().size, 3);
        assert_eq!(path_queries(&ctx), queries);

        let uncached = ShareConfig {
            attr_cache_ttl: Duration::ZERO,
            ..Default::default()
        };
        let ctx = TestContext::with_share_config(MockConfig::default(), uncached)
            .await
            .unwrap();
        ctx.server.add_file("\\f", b"abc");
        let node = ctx.share.lookup("\\f").await.unwrap();
        ctx.server.touch("\\f", b"abcdef");
        assert_eq!(ctx.share.getattr(&node).await.unwrap().size, 6);
    }

    #[tokio::test]
    async fn test_set_basic_info() {
        let ctx = TestContext::new(MockConfig::default()).await.unwrap();
        ctx.server.add_file("\\f", b"abc");
        let node = ctx.share.lookup("\\f").await.unwrap();

        let stamp = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();
        let info = BasicSetInfo {
            write_time: Some(stamp),
            attributes: Some(DosAttributes::READONLY),
            ..Default::default()
        };
        ctx.share.set_basic_info(&node, &info).await.unwrap();

        let attrs = ctx.share.getattr(&node).await.unwrap();
        assert_eq!(attrs.write_time, stamp);
        assert_eq!(attrs.create_time, base_time());
        assert!(attrs.dos_attributes.contains(DosAttributes::READONLY));
        assert!(!attrs.dos_attributes.contains(DosAttributes::ARCHIVE));
    }

    #[tokio::test]
    async fn test_stream_presence() {
        let config = MockConfig {
            named_streams: true,
            ..Default::default()
        };
        let ctx = TestContext::new(config).await.unwrap();
        ctx.server.add_file("\\mac.doc", b"doc");
        ctx.server.set_streams("\\mac.doc", &[FINDER_INFO_STREAM]);
        let node = ctx.share.lookup("\\mac.doc").await.unwrap();

        assert!(ctx.share.has_stream(&node, FINDER_INFO_STREAM).await.unwrap());
        assert!(!ctx.share.has_stream(&node, RESOURCE_FORK_STREAM).await.unwrap());
        let queries = path_queries(&ctx);

        // the miss is remembered
        assert!(!ctx.share.has_stream(&node, RESOURCE_FORK_STREAM).await.unwrap());
        assert_eq!(path_queries(&ctx), queries);

        let plain = TestContext::new(MockConfig::default()).await.unwrap();
        plain.server.add_file("\\f", b"");
        let node = plain.share.lookup("\\f").await.unwrap();
        let before = path_queries(&plain);
        assert!(!plain.share.has_stream(&node, FINDER_INFO_STREAM).await.unwrap());
        assert_eq!(path_queries(&plain), before);
    }
}
