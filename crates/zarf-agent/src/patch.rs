//! JSON patch construction
//!
//! Hooks describe where the rewritten references, the insecure flag and the
//! pull secret live in their object; [`build`] turns that into an ordered
//! RFC 6902 patch checked against the admitted object:
//!
//! 1. `replace` for every rewritten reference, then `add`/`replace` for
//!    fields that may be absent
//! 2. `add`/`replace` of the insecure flag when the registry is internal
//! 3. `add` of the pull secret reference
//! 4. `add` of `/metadata/labels` with the provenance label merged in
//!
//! `replace` requires the target to exist and `add` requires its parent to
//! exist; a target that violates this is a [`Error::PatchBuild`].

use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use serde_json::{json, Map, Value};
use zarf_common::{Error, MirrorConfig, AGENT_LABEL_KEY, AGENT_LABEL_VALUE};

/// Which pull secret an object is pointed at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretKind {
    /// Registry credentials
    Registry,
    /// Git server credentials
    Git,
}

/// How the secret reference is stored in the object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretShape {
    /// `{"name": ...}` (Flux `secretRef`)
    Object,
    /// `[{"name": ...}, ...]` merged with existing entries (Pod `imagePullSecrets`)
    List,
}

/// Where a pull secret reference goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretPlacement {
    /// Field holding the reference
    pub path: PointerBuf,
    /// Which secret
    pub kind: SecretKind,
    /// How it is stored
    pub shape: SecretShape,
}

/// Desired end state of one admitted object
#[derive(Clone, Debug)]
pub struct PatchTarget<'a> {
    object: &'a Value,
    references: Vec<(PointerBuf, Value)>,
    upserts: Vec<(PointerBuf, Value)>,
    insecure: Option<PointerBuf>,
    secret: Option<SecretPlacement>,
}

impl<'a> PatchTarget<'a> {
    /// Start from the admitted object
    pub fn new(object: &'a Value) -> Self {
        Self {
            object,
            references: Vec::new(),
            upserts: Vec::new(),
            insecure: None,
            secret: None,
        }
    }

    /// Replace the existing field at `path` with `value`
    pub fn replace(mut self, path: PointerBuf, value: impl Into<Value>) -> Self {
        self.references.push((path, value.into()));
        self
    }

    /// Set the field at `path` to `value`, creating it if needed
    pub fn set(mut self, path: PointerBuf, value: impl Into<Value>) -> Self {
        self.upserts.push((path, value.into()));
        self
    }

    /// Field that turns off TLS verification, set when the registry is internal
    pub fn insecure(mut self, path: PointerBuf) -> Self {
        self.insecure = Some(path);
        self
    }

    /// Field that references the pull secret
    pub fn secret(mut self, path: PointerBuf, kind: SecretKind, shape: SecretShape) -> Self {
        self.secret = Some(SecretPlacement { path, kind, shape });
        self
    }

    /// Number of reference replacements and field updates
    pub fn reference_count(&self) -> usize {
        self.references.len() + self.upserts.len()
    }
}

/// Build the patch for `target` against `mirror`
pub fn build(
    target: &PatchTarget<'_>,
    mirror: &MirrorConfig,
) -> Result<Vec<PatchOperation>, Error> {
    let object = target.object;
    let mut ops = Vec::with_capacity(target.reference_count() + 3);

    for (path, value) in &target.references {
        if object.pointer(path.as_str()).is_none() {
            return Err(Error::patch_build(path.as_str(), "replace target does not exist"));
        }
        ops.push(PatchOperation::Replace(ReplaceOperation {
            path: path.clone(),
            value: value.clone(),
        }));
    }

    for (path, value) in &target.upserts {
        ops.push(set(object, path, value.clone())?);
    }

    if mirror.registry_internal {
        if let Some(path) = &target.insecure {
            ops.push(set(object, path, Value::Bool(true))?);
        }
    }

    if let Some(placement) = &target.secret {
        let name = match placement.kind {
            SecretKind::Registry => &mirror.registry_pull_secret_name,
            SecretKind::Git => &mirror.git_pull_secret_name,
        };
        if let Some(op) = secret_reference(object, placement, name)? {
            ops.push(op);
        }
    }

    ops.push(provenance_label(object)?);
    Ok(ops)
}

/// `replace` when the field exists, `add` when only its parent does
fn set(object: &Value, path: &PointerBuf, value: Value) -> Result<PatchOperation, Error> {
    if object.pointer(path.as_str()).is_some() {
        return Ok(PatchOperation::Replace(ReplaceOperation {
            path: path.clone(),
            value,
        }));
    }
    require_parent(object, path)?;
    Ok(PatchOperation::Add(AddOperation {
        path: path.clone(),
        value,
    }))
}

fn secret_reference(
    object: &Value,
    placement: &SecretPlacement,
    name: &str,
) -> Result<Option<PatchOperation>, Error> {
    let entry = json!({ "name": name });
    match placement.shape {
        SecretShape::Object => {
            require_parent(object, &placement.path)?;
            Ok(Some(PatchOperation::Add(AddOperation {
                path: placement.path.clone(),
                value: entry,
            })))
        }
        SecretShape::List => {
            let mut entries = match object.pointer(placement.path.as_str()) {
                Some(Value::Array(existing)) => existing.clone(),
                Some(Value::Null) | None => {
                    require_parent(object, &placement.path)?;
                    Vec::new()
                }
                Some(_) => {
                    return Err(Error::patch_build(
                        placement.path.as_str(),
                        "secret list is not an array",
                    ))
                }
            };
            if entries.iter().any(|e| e.get("name").and_then(Value::as_str) == Some(name)) {
                return Ok(None);
            }
            entries.push(entry);
            Ok(Some(PatchOperation::Add(AddOperation {
                path: placement.path.clone(),
                value: Value::Array(entries),
            })))
        }
    }
}

/// Exactly one label operation, whether or not the object has labels yet
fn provenance_label(object: &Value) -> Result<PatchOperation, Error> {
    let path = PointerBuf::from_tokens(["metadata", "labels"]);
    require_parent(object, &path)?;

    let mut labels = match object.pointer(path.as_str()) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    labels.insert(
        AGENT_LABEL_KEY.to_string(),
        Value::String(AGENT_LABEL_VALUE.to_string()),
    );

    Ok(PatchOperation::Add(AddOperation {
        path,
        value: Value::Object(labels),
    }))
}

fn require_parent(object: &Value, path: &PointerBuf) -> Result<(), Error> {
    let parent = match path.as_str().rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    };
    match object.pointer(parent) {
        Some(Value::Object(_)) | Some(Value::Array(_)) => Ok(()),
        _ => Err(Error::patch_build(path.as_str(), "parent does not exist")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::admission::Operation;
    use zarf_transform::{ReferenceEncoding, Transformer};

    use crate::guard::should_mutate;

    fn mirror(internal: bool) -> MirrorConfig {
        MirrorConfig {
            registry_address: "mirror.internal:5000".to_string(),
            registry_internal: internal,
            registry_pull_secret_name: "private-registry".to_string(),
            git_address: "http://mirror.internal:5000".to_string(),
            git_push_username: "zarf-git-user".to_string(),
            git_pull_secret_name: "private-git-server".to_string(),
        }
    }

    fn helm_repo() -> Value {
        json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1",
            "kind": "HelmRepository",
            "metadata": {
                "name": "podinfo",
                "namespace": "flux-system",
                "labels": {"app": "podinfo"}
            },
            "spec": {"type": "oci", "url": "oci://ghcr.io/stefanprodan/charts"}
        })
    }

    fn op_path(op: &PatchOperation) -> &str {
        match op {
            PatchOperation::Add(add) => add.path.as_str(),
            PatchOperation::Replace(replace) => replace.path.as_str(),
            other => panic!("unexpected operation {:?}", other),
        }
    }

    fn label_ops(ops: &[PatchOperation]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, PatchOperation::Add(_)) && op_path(op) == "/metadata/labels")
            .count()
    }

    #[test]
    fn test_operation_order() {
        let object = helm_repo();
        let target = PatchTarget::new(&object)
            .replace(
                PointerBuf::from_tokens(["spec", "url"]),
                "oci://mirror.internal:5000/stefanprodan/charts",
            )
            .insecure(PointerBuf::from_tokens(["spec", "insecure"]))
            .secret(
                PointerBuf::from_tokens(["spec", "secretRef"]),
                SecretKind::Registry,
                SecretShape::Object,
            );

        let ops = build(&target, &mirror(true)).unwrap();
        let paths: Vec<_> = ops.iter().map(op_path).collect();
        assert_eq!(
            paths,
            vec!["/spec/url", "/spec/insecure", "/spec/secretRef", "/metadata/labels"]
        );
        assert!(matches!(&ops[0], PatchOperation::Replace(_)));
        assert!(matches!(&ops[1], PatchOperation::Add(add) if add.value == json!(true)));
        assert!(matches!(
            &ops[2],
            PatchOperation::Add(add) if add.value == json!({"name": "private-registry"})
        ));
    }

    #[test]
    fn test_insecure_only_for_internal_registry() {
        let object = helm_repo();
        let target = PatchTarget::new(&object)
            .replace(PointerBuf::from_tokens(["spec", "url"]), "oci://registry.corp/charts")
            .insecure(PointerBuf::from_tokens(["spec", "insecure"]));

        let internal = build(&target, &mirror(true)).unwrap();
        let external = build(&target, &mirror(false)).unwrap();
        assert!(internal.iter().any(|op| op_path(op) == "/spec/insecure"));
        assert!(!external.iter().any(|op| op_path(op) == "/spec/insecure"));
    }

    #[test]
    fn test_set_adds_or_replaces() {
        let object = json!({"metadata": {}, "spec": {"ref": {"tag": "1.0"}}});
        let target = PatchTarget::new(&object)
            .set(PointerBuf::from_tokens(["spec", "ref", "tag"]), "1.0-zarf-0a1b2c3d")
            .set(PointerBuf::from_tokens(["spec", "interval"]), "1m");
        let ops = build(&target, &mirror(false)).unwrap();
        assert!(matches!(&ops[0], PatchOperation::Replace(_)));
        assert_eq!(op_path(&ops[0]), "/spec/ref/tag");
        assert!(matches!(&ops[1], PatchOperation::Add(a) if a.path.as_str() == "/spec/interval"));
        assert_eq!(target.reference_count(), 2);
    }

    #[test]
    fn test_existing_insecure_flag_is_replaced() {
        let mut object = helm_repo();
        object["spec"]["insecure"] = json!(false);
        let target =
            PatchTarget::new(&object).insecure(PointerBuf::from_tokens(["spec", "insecure"]));

        let ops = build(&target, &mirror(true)).unwrap();
        assert!(matches!(&ops[0], PatchOperation::Replace(_)));
        assert_eq!(op_path(&ops[0]), "/spec/insecure");
    }

    /// Story: existing labels survive and exactly one label patch is emitted
    #[test]
    fn story_provenance_label_merges_existing_labels() {
        let object = helm_repo();
        let ops = build(&PatchTarget::new(&object), &mirror(false)).unwrap();
        assert_eq!(label_ops(&ops), 1);
        match &ops[0] {
            PatchOperation::Add(add) => {
                assert_eq!(add.value, json!({"app": "podinfo", "zarf-agent": "patched"}))
            }
            other => panic!("Expected add, got {:?}", other),
        }

        // Already labelled objects still get the label written once
        let mut labelled = helm_repo();
        labelled["metadata"]["labels"]["zarf-agent"] = json!("patched");
        let ops = build(&PatchTarget::new(&labelled), &mirror(false)).unwrap();
        assert_eq!(label_ops(&ops), 1);
    }

    #[test]
    fn test_labels_created_when_absent() {
        let object = json!({"metadata": {"name": "x"}, "spec": {}});
        let ops = build(&PatchTarget::new(&object), &mirror(false)).unwrap();
        assert!(matches!(
            &ops[0],
            PatchOperation::Add(add) if add.value == json!({"zarf-agent": "patched"})
        ));
    }

    #[test]
    fn test_missing_replace_target_is_patch_build_error() {
        let object = json!({"metadata": {}, "spec": {}});
        let target =
            PatchTarget::new(&object).replace(PointerBuf::from_tokens(["spec", "url"]), "x");
        let err = build(&target, &mirror(false)).unwrap_err();
        assert!(matches!(err, Error::PatchBuild { ref path, .. } if path == "/spec/url"));
    }

    #[test]
    fn test_missing_parent_is_patch_build_error() {
        let object = json!({"metadata": {}});
        let target = PatchTarget::new(&object).secret(
            PointerBuf::from_tokens(["spec", "secretRef"]),
            SecretKind::Git,
            SecretShape::Object,
        );
        assert!(matches!(
            build(&target, &mirror(false)).unwrap_err(),
            Error::PatchBuild { .. }
        ));
    }

    #[test]
    fn test_secret_list_merges_and_deduplicates() {
        let object = json!({
            "metadata": {},
            "spec": {"imagePullSecrets": [{"name": "team-registry"}]}
        });
        let path = PointerBuf::from_tokens(["spec", "imagePullSecrets"]);
        let target =
            PatchTarget::new(&object).secret(path.clone(), SecretKind::Registry, SecretShape::List);
        let ops = build(&target, &mirror(false)).unwrap();
        assert!(matches!(
            &ops[0],
            PatchOperation::Add(add)
                if add.value == json!([{"name": "team-registry"}, {"name": "private-registry"}])
        ));

        let object = json!({
            "metadata": {},
            "spec": {"imagePullSecrets": [{"name": "private-registry"}]}
        });
        let target =
            PatchTarget::new(&object).secret(path, SecretKind::Registry, SecretShape::List);
        let ops = build(&target, &mirror(false)).unwrap();
        assert_eq!(ops.len(), 1, "only the label patch is expected");
    }

    /// Story: a git source is rewritten once; the rewritten object re-fed as
    /// an update produces no patches
    #[test]
    fn story_git_source_mutates_exactly_once() {
        let mirror = mirror(true);
        let transformer = Transformer::new(ReferenceEncoding::Checksum);
        let upstream = "https://git.example.com/org/repo.git";
        let mut object = json!({
            "metadata": {"name": "repo", "namespace": "apps"},
            "spec": {"url": upstream, "ref": {"branch": "main"}}
        });

        assert!(should_mutate(&Operation::Create, upstream, &mirror.git_address));
        let rewritten = transformer
            .git_url(&mirror.git_address, &mirror.git_push_username, upstream)
            .unwrap();
        let target = PatchTarget::new(&object)
            .replace(PointerBuf::from_tokens(["spec", "url"]), rewritten.clone())
            .insecure(PointerBuf::from_tokens(["spec", "insecure"]))
            .secret(
                PointerBuf::from_tokens(["spec", "secretRef"]),
                SecretKind::Git,
                SecretShape::Object,
            );
        let ops = build(&target, &mirror).unwrap();

        let kinds: Vec<_> = ops
            .iter()
            .map(|op| match op {
                PatchOperation::Replace(r) => format!("replace {}", r.path.as_str()),
                PatchOperation::Add(a) => format!("add {}", a.path.as_str()),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "replace /spec/url",
                "add /spec/insecure",
                "add /spec/secretRef",
                "add /metadata/labels"
            ]
        );

        json_patch::patch(&mut object, &ops).unwrap();
        assert_eq!(object["spec"]["url"], json!(rewritten));
        assert_eq!(object["spec"]["secretRef"]["name"], json!("private-git-server"));
        assert_eq!(object["metadata"]["labels"]["zarf-agent"], json!("patched"));

        let current = object["spec"]["url"].as_str().unwrap();
        assert!(!should_mutate(&Operation::Update, current, &mirror.git_address));
    }
}
