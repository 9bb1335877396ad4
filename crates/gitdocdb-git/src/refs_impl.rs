//! gix-backed ref, rev-parse, and ancestry operations.

use gix::refs::transaction::{PreviousValue, RefEdit as GixRefEdit, RefLog};
use gix::refs::Target;

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::types::*;

fn to_gix_oid(oid: GitOid) -> gix::ObjectId {
    gix::ObjectId::from_bytes_or_panic(oid.as_bytes())
}

fn from_gix_id(id: gix::Id<'_>) -> GitOid {
    let bytes: [u8; 20] = id.as_bytes().try_into().expect("SHA1 is 20 bytes");
    GitOid::from_bytes(bytes)
}

pub fn read_ref(repo: &GixRepo, name: &RefName) -> Result<Option<GitOid>, GitError> {
    let Some(mut reference) =
        repo.repo
            .try_find_reference(name.as_str())
            .map_err(|e| GitError::BackendError {
                message: format!("failed to look up ref '{name}': {e}"),
            })?
    else {
        return Ok(None);
    };
    let id = reference
        .peel_to_id_in_place()
        .map_err(|e| GitError::BackendError {
            message: format!("failed to peel ref '{name}' to an object id: {e}"),
        })?;
    Ok(Some(from_gix_id(id)))
}

pub fn write_ref(repo: &GixRepo, name: &RefName, oid: GitOid, log_message: &str) -> Result<(), GitError> {
    repo.repo
        .reference(
            name.as_str(),
            to_gix_oid(oid),
            PreviousValue::Any,
            log_message,
        )
        .map_err(|e| GitError::BackendError {
            message: format!("failed to write ref '{name}': {e}"),
        })?;
    Ok(())
}

pub fn atomic_ref_update(repo: &GixRepo, edits: &[RefEdit]) -> Result<(), GitError> {
    let gix_edits: Vec<GixRefEdit> = edits
        .iter()
        .map(|edit| {
            let expected = if edit.expected_old_oid.is_zero() {
                PreviousValue::MustNotExist
            } else {
                PreviousValue::MustExistAndMatch(Target::Object(to_gix_oid(edit.expected_old_oid)))
            };
            GixRefEdit {
                change: gix::refs::transaction::Change::Update {
                    log: gix::refs::transaction::LogChange {
                        mode: RefLog::AndReference,
                        force_create_reflog: false,
                        message: "gitdocdb: atomic ref update".into(),
                    },
                    expected,
                    new: Target::Object(to_gix_oid(edit.new_oid)),
                },
                name: edit
                    .name
                    .as_str()
                    .try_into()
                    .expect("RefName already validated"),
                deref: false,
            }
        })
        .collect();

    repo.repo
        .edit_references(gix_edits)
        .map_err(|e| GitError::RefConflict {
            ref_name: edits
                .first()
                .map(|e| e.name.to_string())
                .unwrap_or_default(),
            message: e.to_string(),
        })?;
    Ok(())
}

pub fn rev_parse(repo: &GixRepo, spec: &str) -> Result<GitOid, GitError> {
    let id = repo
        .repo
        .rev_parse_single(spec)
        .map_err(|e| GitError::NotFound {
            message: format!("could not resolve '{spec}': {e}"),
        })?;
    Ok(from_gix_id(id))
}

pub fn rev_parse_opt(repo: &GixRepo, spec: &str) -> Result<Option<GitOid>, GitError> {
    match repo.repo.rev_parse_single(spec) {
        Ok(id) => Ok(Some(from_gix_id(id))),
        Err(_) => Ok(None),
    }
}

pub fn is_ancestor(repo: &GixRepo, ancestor: GitOid, descendant: GitOid) -> Result<bool, GitError> {
    if ancestor == descendant {
        return Ok(true);
    }
    match merge_base(repo, ancestor, descendant)? {
        Some(base) => Ok(base == ancestor),
        None => Ok(false),
    }
}

pub fn merge_base(repo: &GixRepo, a: GitOid, b: GitOid) -> Result<Option<GitOid>, GitError> {
    let id_a = repo
        .repo
        .find_object(to_gix_oid(a))
        .map_err(|e| GitError::NotFound {
            message: format!("commit {a}: {e}"),
        })?
        .id;
    let id_b = to_gix_oid(b);

    match repo.repo.merge_base(id_a, id_b) {
        Ok(id) => Ok(Some(from_gix_id(id.attach(&repo.repo)))),
        Err(gix::repository::merge_base::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(GitError::BackendError {
            message: format!("merge-base({a}, {b}) failed: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &std::path::Path) -> GixRepo {
        gix::init(dir).expect("init repo");
        GixRepo::open(dir).expect("open repo")
    }

    #[test]
    fn read_ref_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        let name = RefName::new("refs/heads/main").unwrap();
        assert_eq!(read_ref(&repo, &name).unwrap(), None);
    }

    #[test]
    fn rev_parse_opt_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        assert_eq!(rev_parse_opt(&repo, "refs/heads/main").unwrap(), None);
    }
}
