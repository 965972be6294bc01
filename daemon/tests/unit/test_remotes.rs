//! Remote comparison tests

use deployd::deploy::remote::RemoteIdentity;

#[test]
fn test_ssh_and_https_forms_match() {
    assert!(RemoteIdentity::same_repository(
        "git@github.com:acme/shop.git",
        "https://github.com/acme/shop"
    ));
    assert!(RemoteIdentity::same_repository(
        "ssh://git@gitlab.com:2222/group/sub/app.git",
        "https://gitlab.com/group/sub/app.git/"
    ));
}

#[test]
fn test_different_repositories() {
    assert!(!RemoteIdentity::same_repository(
        "git@github.com:acme/shop.git",
        "git@github.com:acme/shop-api.git"
    ));
    assert!(!RemoteIdentity::same_repository(
        "https://github.com/acme/shop",
        "https://gitlab.com/acme/shop"
    ));
}

#[test]
fn test_unparseable_never_matches() {
    assert!(!RemoteIdentity::same_repository("", ""));
    assert!(!RemoteIdentity::same_repository("not a remote", "not a remote"));
}
