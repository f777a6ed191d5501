//! Build metadata emitted by `build.rs`.

/// Git information captured at build time, when the crate was built from a
/// git checkout.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub branch: Option<&'static str>,
    pub commit_sha1: Option<&'static str>,
    pub git_dirty: bool,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    branch: option_env!("VERGEN_GIT_BRANCH"),
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: is_true(option_env!("VERGEN_GIT_DIRTY")),
};

/// `str` patterns are not allowed in const contexts, so compare bytes.
const fn is_true(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let value = value.as_bytes();
    let expected = b"true";
    if value.len() != expected.len() {
        return false;
    }
    let mut i = 0;
    while i < value.len() {
        if value[i] != expected[i] {
            return false;
        }
        i += 1;
    }
    true
}
