//! Git repository URL parsing
//!
//! Accepts the URL shapes found in Flux and Argo CD sources:
//! `scheme://[user@]host[:port]/owner/repo[.git][@ref][/smart-http-path]`, where
//! the smart HTTP path is `/info/refs...`, `/git-upload-pack` or `/git-receive-pack`.

use zarf_common::Error;

/// Smart-HTTP endpoints git clients append to a repository URL
const GIT_SERVICE_SUFFIXES: [&str; 2] = ["/git-upload-pack", "/git-receive-pack"];

/// A git URL split into the parts the mirror transform needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitUrl<'a> {
    /// URL scheme (`https`, `http`, `ssh`, ...)
    pub scheme: &'a str,
    /// Host with optional port, user info removed
    pub host: &'a str,
    /// Path between host and repository name, may be empty
    pub owner_path: &'a str,
    /// Repository name without `.git`
    pub repo: &'a str,
    /// Whether the URL ended in `.git`
    pub dot_git: bool,
    /// Ref after `@`, including a leading `+` when forced
    pub at_ref: Option<&'a str>,
    /// Trailing smart-HTTP path, starting with `/`
    pub git_path: Option<&'a str>,
}

impl<'a> GitUrl<'a> {
    /// Parse a git repository URL
    pub fn parse(url: &'a str) -> Result<Self, Error> {
        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::reference_parse(
                url,
                "URL contains whitespace or control characters",
            ));
        }

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::reference_parse(url, "git URLs must have a scheme"))?;
        let valid_scheme = scheme.starts_with(|c: char| c.is_ascii_lowercase())
            && scheme.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '-')
            });
        if !valid_scheme {
            return Err(Error::reference_parse(url, format!("invalid scheme '{}'", scheme)));
        }

        let (authority, mut path) = rest
            .split_once('/')
            .ok_or_else(|| Error::reference_parse(url, "missing repository path"))?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        if host.is_empty() {
            return Err(Error::reference_parse(url, "host is empty"));
        }

        let mut git_path = None;
        if let Some(i) = path.find("/info/") {
            git_path = Some(&path[i..]);
            path = &path[..i];
        } else if let Some(suffix) = GIT_SERVICE_SUFFIXES.iter().find(|s| path.ends_with(*s)) {
            let i = path.len() - suffix.len();
            git_path = Some(&path[i..]);
            path = &path[..i];
        }

        let mut at_ref = None;
        if let Some(i) = path.find('@') {
            let reference = &path[i + 1..];
            let valid_ref = !reference.is_empty()
                && reference
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '/' | '+' | '_' | '-' | '.'));
            if !valid_ref {
                return Err(Error::reference_parse(url, format!("invalid ref '{}'", reference)));
            }
            at_ref = Some(reference);
            path = &path[..i];
        }

        let path = path.trim_end_matches('/');
        let (owner_path, repo) = path.rsplit_once('/').unwrap_or(("", path));
        let (repo, dot_git) = match repo.strip_suffix(".git") {
            Some(repo) => (repo, true),
            None => (repo, false),
        };

        let valid_repo = !repo.is_empty()
            && repo
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid_repo {
            return Err(Error::reference_parse(url, "missing or invalid repository name"));
        }

        Ok(Self {
            scheme,
            host,
            owner_path,
            repo,
            dot_git,
            at_ref,
            git_path,
        })
    }

    /// Credential-free, ref-free identity of the upstream repository
    ///
    /// `https://host/org/repo.git@main` and `https://user@HOST/org/repo`
    /// name the same repository and must land on the same mirror path.
    pub fn identity(&self) -> String {
        let host = self.host.to_ascii_lowercase();
        if self.owner_path.is_empty() {
            format!("{}://{}/{}", self.scheme, host, self.repo)
        } else {
            format!("{}://{}/{}/{}", self.scheme, host, self.owner_path, self.repo)
        }
    }

    /// Everything after the repository name that must survive the rewrite
    pub fn suffix(&self) -> String {
        let mut suffix = String::new();
        if self.dot_git {
            suffix.push_str(".git");
        }
        if let Some(at_ref) = self.at_ref {
            suffix.push('@');
            suffix.push_str(at_ref);
        }
        if let Some(git_path) = self.git_path {
            suffix.push_str(git_path);
        }
        suffix
    }
}
