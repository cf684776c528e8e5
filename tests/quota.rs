mod common;

use common::TestSite;
use kbasix::error::Error;

#[tokio::test]
async fn test_soft_quota_blocks_only_new_additions() {
    let site = TestSite::with_config(|config| config.registration.default_quota = 16);
    site.register("alice");
    let alice = site.login("alice");

    // The upload that crosses the quota still completes.
    let big = site.upload(&alice, "big", &[7u8; 32]).await;
    let listing = site.cms.list_files(&alice).await.unwrap();
    assert_eq!(listing.usage, 32);
    assert_eq!(listing.quota, 16);

    assert!(matches!(
        site.cms.begin_upload(&alice).await,
        Err(Error::OverQuota { usage: 32, quota: 16 })
    ));
    assert!(matches!(
        site.cms.copy_file(&alice, &big.file_tag).await,
        Err(Error::OverQuota { .. })
    ));

    site.cms.delete_file(&alice, &big.file_tag).await.unwrap();
    assert_eq!(site.cms.list_files(&alice).await.unwrap().usage, 0);
    site.upload(&alice, "small", b"tiny").await;
}

#[tokio::test]
async fn test_empty_upload_is_flagged() {
    let site = TestSite::new();
    site.register("bob");
    let bob = site.login("bob");

    let upload = site.cms.begin_upload(&bob).await.unwrap();
    let uploaded = site
        .cms
        .finish_upload(&bob, upload, Default::default())
        .await
        .unwrap();
    assert!(uploaded.empty);
    assert_eq!(uploaded.file.size, 0);
}

#[tokio::test]
async fn test_bulk_delete_counts_failures() {
    let site = TestSite::new();
    site.register("carol");
    let carol = site.login("carol");
    let first = site.upload(&carol, "one", b"1").await;
    let second = site.upload(&carol, "two", b"2").await;

    let result = site
        .cms
        .bulk_delete(
            &carol,
            &[
                first.file_tag.to_string(),
                "not-a-tag".to_string(),
                second.file_tag.to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(result.deleted, 2);
    assert_eq!(result.failed, 1);
    assert!(site.cms.list_files(&carol).await.unwrap().files.is_empty());
}
