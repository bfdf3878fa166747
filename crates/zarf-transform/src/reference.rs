//! Parsing of image references and OCI repository URLs
//!
//! Follows the container image grammar closely enough to reject what a
//! container runtime would reject, without pulling in a full OCI client.

use std::fmt;

use zarf_common::Error;

/// Registry assumed for references without an explicit host
pub const DOCKER_HUB_HOST: &str = "docker.io";

/// Tag assumed for references with neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// URL prefix of OCI repositories
pub const OCI_SCHEME_PREFIX: &str = "oci://";

/// Normalized decomposition of an image reference, OCI URL or git URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedReference {
    /// URL scheme (`oci`, `https`, ...), absent for plain image references
    pub scheme: Option<String>,
    /// Host with optional port
    pub host: String,
    /// Repository path without leading slash
    pub path: String,
    /// Image tag or git ref
    pub tag: Option<String>,
    /// Content digest (`sha256:...`)
    pub digest: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Docker Hub defaults apply
    Image,
    /// First path component is always the host, no default tag
    OciRepository,
}

impl ParsedReference {
    /// Parse a container image reference (`host[:port]/path[:tag][@digest]`)
    ///
    /// `nginx` normalizes to `docker.io/library/nginx:latest`.
    pub fn parse_image(reference: &str) -> Result<Self, Error> {
        if reference.contains("://") {
            return Err(Error::reference_parse(
                reference,
                "image references cannot have a scheme",
            ));
        }
        parse_components(reference, reference, Mode::Image)
    }

    /// Parse an `oci://host/path[:tag][@digest]` repository URL
    pub fn parse_oci_url(url: &str) -> Result<Self, Error> {
        let rest = url
            .strip_prefix(OCI_SCHEME_PREFIX)
            .ok_or_else(|| Error::reference_parse(url, "OCI URLs must start with oci://"))?;
        let mut parsed = parse_components(url, rest, Mode::OciRepository)?;
        parsed.scheme = Some("oci".to_string());
        Ok(parsed)
    }

    /// Host without port, lowercased
    pub fn hostname(&self) -> String {
        strip_port(&self.host).to_ascii_lowercase()
    }

    /// Repository name: `host/path`, host lowercased
    pub fn name(&self) -> String {
        format!("{}/{}", self.host.to_ascii_lowercase(), self.path)
    }
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://", scheme)?;
        }
        write!(f, "{}/{}", self.host, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn parse_components(original: &str, input: &str, mode: Mode) -> Result<ParsedReference, Error> {
    if input.is_empty() {
        return Err(Error::reference_parse(original, "reference is empty"));
    }
    if input.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::reference_parse(
            original,
            "reference contains whitespace or control characters",
        ));
    }

    let (rest, digest) = match input.split_once('@') {
        Some((rest, digest)) => {
            validate_digest(original, digest)?;
            (rest, Some(digest.to_string()))
        }
        None => (input, None),
    };

    let (host, remainder) = match (mode, rest.split_once('/')) {
        (Mode::OciRepository, Some((host, tail))) => (host, tail),
        (Mode::OciRepository, None) => {
            return Err(Error::reference_parse(original, "missing repository path"))
        }
        (Mode::Image, Some((first, tail))) if looks_like_host(first) => (first, tail),
        (Mode::Image, _) => (DOCKER_HUB_HOST, rest),
    };
    validate_host(original, host)?;

    // A ':' after the last '/' separates the tag
    let (path, tag) = match remainder.rfind(':') {
        Some(i) if !remainder[i..].contains('/') => (&remainder[..i], Some(&remainder[i + 1..])),
        _ => (remainder, None),
    };

    let path = if host == DOCKER_HUB_HOST && !path.contains('/') && !path.is_empty() {
        format!("library/{}", path)
    } else {
        path.to_string()
    };
    validate_path(original, &path)?;

    if let Some(tag) = tag {
        validate_tag(original, tag)?;
    }

    let tag = match (tag, &digest, mode) {
        (Some(tag), _, _) => Some(tag.to_string()),
        (None, None, Mode::Image) => Some(DEFAULT_TAG.to_string()),
        _ => None,
    };

    Ok(ParsedReference {
        scheme: None,
        host: host.to_string(),
        path,
        tag,
        digest,
    })
}

/// The first component names a registry when it has a dot, a port, is
/// `localhost`, or has uppercase letters (repository paths cannot)
fn looks_like_host(component: &str) -> bool {
    component.contains('.')
        || component.contains(':')
        || component == "localhost"
        || component.chars().any(|c| c.is_ascii_uppercase())
}

fn validate_host(original: &str, host: &str) -> Result<(), Error> {
    if host.is_empty() {
        return Err(Error::reference_parse(original, "host is empty"));
    }
    let valid = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if !valid {
        return Err(Error::reference_parse(
            original,
            format!("invalid host '{}'", host),
        ));
    }
    Ok(())
}

fn validate_path(original: &str, path: &str) -> Result<(), Error> {
    if path.is_empty() {
        return Err(Error::reference_parse(original, "repository path is empty"));
    }
    for component in path.split('/') {
        if component.is_empty() {
            return Err(Error::reference_parse(
                original,
                "repository path has an empty component",
            ));
        }
        let starts_and_ends_alnum = component
            .chars()
            .next()
            .zip(component.chars().last())
            .is_some_and(|(first, last)| {
                first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
            });
        let valid_chars = component.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
        });
        if !starts_and_ends_alnum || !valid_chars {
            return Err(Error::reference_parse(
                original,
                format!("invalid repository path component '{}'", component),
            ));
        }
    }
    Ok(())
}

fn validate_tag(original: &str, tag: &str) -> Result<(), Error> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(&['.', '-'][..])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(Error::reference_parse(
            original,
            format!("invalid tag '{}'", tag),
        ));
    }
    Ok(())
}

fn validate_digest(original: &str, digest: &str) -> Result<(), Error> {
    let valid = match digest.split_once(':') {
        Some((algorithm, encoded)) => {
            !algorithm.is_empty()
                && encoded.len() >= 32
                && algorithm.chars().all(|c| {
                    c.is_ascii_lowercase()
                        || c.is_ascii_digit()
                        || matches!(c, '+' | '.' | '_' | '-')
                })
                && encoded
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'))
        }
        None => false,
    };
    if !valid {
        return Err(Error::reference_parse(
            original,
            format!("invalid digest '{}'", digest),
        ));
    }
    Ok(())
}

/// Strip the port from `host[:port]`, keeping IPv6 literals intact
pub(crate) fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
