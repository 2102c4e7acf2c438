// src/core/registry/builtin.rs

//! Built-in distribution definitions.
//!
//! Rule ordering matters: within a distribution the first matching pattern
//! wins, so index files must be listed before the broad package-archive
//! patterns. Package archives are immutable by name (a changed package gets
//! a new filename), so they carry a month-long policy; repository indices
//! mutate in place on every mirror sync and stay on an hour.

use super::{DistributionDef, DistroKind};

/// One hour, for mutable repository indices.
const INDEX_POLICY: &str = "max-age=3600";
/// Thirty days, for immutable-by-name package archives.
const ARCHIVE_POLICY: &str = "max-age=2592000";
/// By-hash objects are content-addressed and never change.
const BY_HASH_POLICY: &str = "max-age=2592000, immutable";

const UBUNTU_MIRRORS: &[(&str, Option<&str>, bool)] = &[
    ("http://archive.ubuntu.com/ubuntu/", None, true),
    ("http://security.ubuntu.com/ubuntu/", None, true),
    ("https://mirrors.tuna.tsinghua.edu.cn/ubuntu/", Some("cn:tsinghua"), false),
    ("https://mirrors.ustc.edu.cn/ubuntu/", Some("cn:ustc"), false),
    ("https://mirrors.aliyun.com/ubuntu/", Some("cn:aliyun"), false),
    ("https://mirrors.huaweicloud.com/ubuntu/", Some("cn:huawei"), false),
    ("https://mirror.nju.edu.cn/ubuntu/", Some("cn:nju"), false),
];

const DEBIAN_MIRRORS: &[(&str, Option<&str>, bool)] = &[
    ("http://deb.debian.org/debian/", None, true),
    ("http://ftp.debian.org/debian/", None, true),
    ("https://mirrors.tuna.tsinghua.edu.cn/debian/", Some("cn:tsinghua"), false),
    ("https://mirrors.ustc.edu.cn/debian/", Some("cn:ustc"), false),
    ("https://mirrors.aliyun.com/debian/", Some("cn:aliyun"), false),
    ("https://mirrors.huaweicloud.com/debian/", Some("cn:huawei"), false),
];

const CENTOS_MIRRORS: &[(&str, Option<&str>, bool)] = &[
    ("http://mirror.stream.centos.org/", None, true),
    ("https://mirrors.tuna.tsinghua.edu.cn/centos-stream/", Some("cn:tsinghua"), false),
    ("https://mirrors.ustc.edu.cn/centos-stream/", Some("cn:ustc"), false),
    ("https://mirrors.aliyun.com/centos-stream/", Some("cn:aliyun"), false),
];

const ALPINE_MIRRORS: &[(&str, Option<&str>, bool)] = &[
    ("http://dl-cdn.alpinelinux.org/alpine/", None, true),
    ("https://mirrors.tuna.tsinghua.edu.cn/alpine/", Some("cn:tsinghua"), false),
    ("https://mirrors.ustc.edu.cn/alpine/", Some("cn:ustc"), false),
    ("https://mirrors.aliyun.com/alpine/", Some("cn:aliyun"), false),
];

// APT repository layout: indices under dists/, archives under pool/.
const APT_RULES: &[(&str, &str, bool)] = &[
    (r"/by-hash/", BY_HASH_POLICY, true),
    (r"(InRelease|Release(\.gpg)?)$", INDEX_POLICY, true),
    (r"(Packages|Sources)(\.(gz|xz|bz2|lzma))?$", INDEX_POLICY, true),
    (r"(Translation-[^/]+)(\.(gz|xz|bz2))?$", INDEX_POLICY, true),
    (r"(Contents-[^/]+)(\.(gz|xz))?$", INDEX_POLICY, true),
    (r"DiffIndex$", INDEX_POLICY, true),
    (r"\.(deb|udeb|ddeb|dsc|tar\.(gz|xz|bz2))$", ARCHIVE_POLICY, true),
    // Catch-all: rewrite to the mirror, let upstream headers govern freshness.
    (r".", "", true),
];

const YUM_RULES: &[(&str, &str, bool)] = &[
    (r"repomd\.xml(\.asc)?$", INDEX_POLICY, true),
    (r"(primary|filelists|other|comps|updateinfo|modules)[^/]*\.(xml|xml\.gz|xml\.xz|yaml\.xz|gz|xz)$", INDEX_POLICY, true),
    (r"\.(rpm|drpm|srpm)$", ARCHIVE_POLICY, true),
    (r".", "", true),
];

const APK_RULES: &[(&str, &str, bool)] = &[
    (r"APKINDEX\.tar\.gz$", INDEX_POLICY, true),
    (r"\.apk$", ARCHIVE_POLICY, true),
    (r".", "", true),
];

/// The built-in distribution table, in classification order.
pub fn builtin_definitions() -> &'static [DistributionDef] {
    const DEFS: &[DistributionDef] = &[
        DistributionDef {
            ident: "ubuntu",
            kind: DistroKind::Ubuntu,
            match_pattern: r"^/ubuntu/",
            extract_pattern: r"^/ubuntu/(.*)$",
            benchmark_probe: "dists/noble/InRelease",
            geo_mirror_list: Some("http://mirrors.ubuntu.com/mirrors.txt"),
            mirrors: UBUNTU_MIRRORS,
            rules: APT_RULES,
        },
        DistributionDef {
            ident: "debian",
            kind: DistroKind::Debian,
            match_pattern: r"^/debian/",
            extract_pattern: r"^/debian/(.*)$",
            benchmark_probe: "dists/bookworm/InRelease",
            geo_mirror_list: None,
            mirrors: DEBIAN_MIRRORS,
            rules: APT_RULES,
        },
        DistributionDef {
            ident: "centos",
            kind: DistroKind::Centos,
            match_pattern: r"^/centos/",
            extract_pattern: r"^/centos/(.*)$",
            benchmark_probe: "9-stream/BaseOS/x86_64/os/repodata/repomd.xml",
            geo_mirror_list: None,
            mirrors: CENTOS_MIRRORS,
            rules: YUM_RULES,
        },
        DistributionDef {
            ident: "alpine",
            kind: DistroKind::Alpine,
            match_pattern: r"^/alpine/",
            extract_pattern: r"^/alpine/(.*)$",
            benchmark_probe: "latest-stable/main/x86_64/APKINDEX.tar.gz",
            geo_mirror_list: Some("https://mirrors.alpinelinux.org/MIRRORS.txt"),
            mirrors: ALPINE_MIRRORS,
            rules: APK_RULES,
        },
    ];
    DEFS
}
