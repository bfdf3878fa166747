//! Reference transforms between upstream hosts and the air-gap mirror
//!
//! Every function here is pure: the same inputs always produce the same
//! output, so independent agent replicas agree on where an object points
//! without sharing anything but the cluster state.
//!
//! # Encoding
//!
//! Distinct upstream hosts are flattened into a single mirror namespace. How
//! collisions are avoided is selected with [`ReferenceEncoding`]:
//!
//! - [`ReferenceEncoding::Checksum`] keeps the upstream path and appends a
//!   checksum of the full upstream name to the tag (`:1.0-zarf-1a2b3c4d`) or
//!   repository name (`podinfo-1a2b3c4d.git`). Digest-pinned images keep their
//!   digest since it already identifies the content.
//! - [`ReferenceEncoding::HostPrefix`] keeps tags untouched and moves the
//!   upstream host into the first path segment (`mirror/ghcr.io/org/app:1.0`).
//!   Git servers have a flat `owner/repo` namespace, so git URLs always use
//!   the checksum encoding.
//!
//! A reference whose host already is the mirror host is returned unchanged,
//! so `transform(m, transform(m, r)) == transform(m, r)`.

#![deny(missing_docs)]

pub mod git;
pub mod reference;

use std::fmt;
use std::str::FromStr;

use zarf_common::Error;

pub use git::GitUrl;
pub use reference::{ParsedReference, DEFAULT_TAG, OCI_SCHEME_PREFIX};

/// Marker between the upstream tag and the checksum
const CHECKSUM_TAG_MARKER: &str = "-zarf-";

/// How distinct upstream hosts are kept apart inside the mirror
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferenceEncoding {
    /// Keep the upstream path, suffix tags and repo names with a checksum
    #[default]
    Checksum,
    /// Prefix the upstream path with the upstream host
    HostPrefix,
}

impl fmt::Display for ReferenceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceEncoding::Checksum => write!(f, "checksum"),
            ReferenceEncoding::HostPrefix => write!(f, "host-prefix"),
        }
    }
}

impl FromStr for ReferenceEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checksum" => Ok(ReferenceEncoding::Checksum),
            "host-prefix" => Ok(ReferenceEncoding::HostPrefix),
            other => Err(Error::config(
                "reference-encoding",
                format!("unknown encoding '{}', expected checksum or host-prefix", other),
            )),
        }
    }
}

/// Syntactic class of a reference found in an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Container image (`host/path:tag`)
    Image,
    /// OCI repository URL (`oci://host/path`)
    Oci,
    /// Git or HTTP(S) repository URL
    Git,
}

impl ReferenceKind {
    /// Classify a reference by its syntax alone
    pub fn of(reference: &str) -> Self {
        if reference.starts_with(OCI_SCHEME_PREFIX) {
            ReferenceKind::Oci
        } else if reference.contains("://") {
            ReferenceKind::Git
        } else {
            ReferenceKind::Image
        }
    }
}

/// Rewrites upstream references onto mirror hosts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transformer {
    encoding: ReferenceEncoding,
}

impl Transformer {
    /// Create a transformer with the given encoding
    pub fn new(encoding: ReferenceEncoding) -> Self {
        Self { encoding }
    }

    /// The encoding in use
    pub fn encoding(&self) -> ReferenceEncoding {
        self.encoding
    }

    /// Rewrite a container image onto the registry at `mirror_host`
    pub fn image(&self, mirror_host: &str, reference: &str) -> Result<String, Error> {
        let mirror = mirror_authority(mirror_host, reference)?;
        let parsed = ParsedReference::parse_image(reference)?;
        if parsed.hostname() == hostname(mirror) {
            return Ok(reference.to_string());
        }

        let rewritten = match self.encoding {
            ReferenceEncoding::Checksum => {
                let (tag, digest) = match (&parsed.tag, &parsed.digest) {
                    (tag, Some(digest)) => (tag.clone(), Some(digest.clone())),
                    (Some(tag), None) => (Some(checksum_tag(tag, &parsed.name())), None),
                    (None, None) => {
                        return Err(Error::reference_transform(reference, "no tag or digest"))
                    }
                };
                ParsedReference {
                    scheme: None,
                    host: mirror.to_string(),
                    path: parsed.path,
                    tag,
                    digest,
                }
            }
            ReferenceEncoding::HostPrefix => ParsedReference {
                scheme: None,
                host: mirror.to_string(),
                path: format!("{}/{}", host_segment(&parsed.host), parsed.path),
                tag: parsed.tag,
                digest: parsed.digest,
            },
        };
        Ok(rewritten.to_string())
    }

    /// Rewrite an `oci://` repository URL onto the registry at `mirror_host`
    ///
    /// Tags and digests in the URL are kept as-is; artifact tags live in the
    /// object's ref and go through [`Transformer::oci_tag`].
    pub fn oci_url(&self, mirror_host: &str, url: &str) -> Result<String, Error> {
        let mirror = mirror_authority(mirror_host, url)?;
        let parsed = ParsedReference::parse_oci_url(url)?;
        if parsed.hostname() == hostname(mirror) {
            return Ok(url.to_string());
        }

        let path = match self.encoding {
            ReferenceEncoding::Checksum => parsed.path,
            ReferenceEncoding::HostPrefix => {
                format!("{}/{}", host_segment(&parsed.host), parsed.path)
            }
        };
        let rewritten = ParsedReference {
            scheme: parsed.scheme,
            host: mirror.to_string(),
            path,
            tag: parsed.tag,
            digest: parsed.digest,
        };
        Ok(rewritten.to_string())
    }

    /// Rewrite the tag of an OCI artifact pulled from `url`
    ///
    /// Matches the tag [`Transformer::image`] produces for `url:tag`, so an
    /// artifact is found whether it was mirrored as an image or an artifact.
    pub fn oci_tag(&self, url: &str, tag: &str) -> Result<String, Error> {
        let parsed = ParsedReference::parse_oci_url(url)?;
        match self.encoding {
            ReferenceEncoding::Checksum => Ok(checksum_tag(tag, &parsed.name())),
            ReferenceEncoding::HostPrefix => Ok(tag.to_string()),
        }
    }

    /// Rewrite a git URL onto the git server at `base_url`, owned by `push_user`
    pub fn git_url(&self, base_url: &str, push_user: &str, url: &str) -> Result<String, Error> {
        let base = base_url.trim_end_matches('/');
        let base_host = mirror_authority(base, url)?;
        if push_user.is_empty() {
            return Err(Error::reference_transform(url, "git push username is empty"));
        }

        let parsed = GitUrl::parse(url)?;
        if hostname(parsed.host) == hostname(base_host) {
            return Ok(url.to_string());
        }

        Ok(format!(
            "{}/{}/{}-{}{}",
            base,
            push_user,
            parsed.repo,
            checksum(&parsed.identity()),
            parsed.suffix()
        ))
    }
}

/// Whether `candidate` already points at `mirror_host`
///
/// Only hosts are compared, case-insensitively and without port: path or tag
/// drift on an object that already targets the mirror is left alone.
/// Candidates that cannot be parsed never match.
pub fn hosts_match(candidate: &str, mirror_host: &str) -> bool {
    let mirror = hostname(authority_of(mirror_host));
    if mirror.is_empty() {
        return false;
    }
    let candidate_host = match ReferenceKind::of(candidate) {
        ReferenceKind::Image => match ParsedReference::parse_image(candidate) {
            Ok(parsed) => parsed.hostname(),
            Err(_) => return false,
        },
        ReferenceKind::Oci | ReferenceKind::Git => hostname(authority_of(candidate)),
    };
    !candidate_host.is_empty() && candidate_host == mirror
}

/// Host with port of an address that may carry a scheme and path
fn authority_of(address: &str) -> &str {
    let rest = address
        .split_once("://")
        .map_or(address, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.rsplit_once('@').map_or(authority, |(_, host)| host)
}

fn mirror_authority<'a>(mirror_host: &'a str, reference: &str) -> Result<&'a str, Error> {
    let authority = authority_of(mirror_host.trim());
    if authority.is_empty() {
        return Err(Error::reference_transform(reference, "mirror host is empty"));
    }
    Ok(authority)
}

fn hostname(authority: &str) -> String {
    reference::strip_port(authority).to_ascii_lowercase()
}

/// Path segment standing in for an upstream host
///
/// `:` becomes `_`, which DNS names cannot contain, so `host:5000` and a
/// host literally named `host-5000` stay apart.
fn host_segment(host: &str) -> String {
    host.trim_start_matches('[')
        .replace(']', "")
        .replace(':', "_")
        .to_ascii_lowercase()
}

fn checksum_tag(tag: &str, name: &str) -> String {
    format!("{}{}{}", tag, CHECKSUM_TAG_MARKER, checksum(name))
}

/// Stable 8-hex-char checksum of an upstream name
///
/// Truncated SHA-256; stable across toolchains and architectures.
pub fn checksum(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..4]
        .iter()
        .fold(String::with_capacity(8), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
