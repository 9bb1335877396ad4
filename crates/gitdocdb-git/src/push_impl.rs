//! gix-backed fetch and push operations.
//!
//! The sync engine's remote step (spec §4.7 steps 1 and 6) only ever touches
//! a single branch at a time, so these wrap `gix`'s connection/negotiation
//! APIs directly rather than going through a generic refspec list.

use gix::progress::Discard;
use gix::remote::Direction;

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::types::GitOid;

fn from_gix_oid(oid: gix::ObjectId) -> GitOid {
    let bytes: [u8; 20] = oid.as_bytes().try_into().expect("SHA1 is 20 bytes");
    GitOid::from_bytes(bytes)
}

pub fn fetch(repo: &GixRepo, remote: &str, branch: &str) -> Result<GitOid, GitError> {
    let remote_handle =
        repo.repo
            .find_remote(remote)
            .map_err(|e| GitError::FetchFailed {
                remote: remote.to_owned(),
                message: format!("unknown remote: {e}"),
            })?;

    let refspec = format!("refs/heads/{branch}:refs/remotes/{remote}/{branch}");
    let remote_handle = remote_handle
        .with_refspecs([refspec.as_str()], Direction::Fetch)
        .map_err(|e| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: format!("invalid refspec '{refspec}': {e}"),
        })?;

    let connection = remote_handle
        .connect(Direction::Fetch)
        .map_err(|e| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: format!("connect failed: {e}"),
        })?;

    let outcome = connection
        .prepare_fetch(Discard, Default::default())
        .map_err(|e| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: format!("prepare_fetch failed: {e}"),
        })?
        .receive(Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: format!("fetch negotiation failed: {e}"),
        })?;

    let wanted_ref = format!("refs/heads/{branch}");
    outcome
        .ref_map
        .mappings
        .iter()
        .find_map(|mapping| {
            let remote_ref_name = mapping.remote.as_name()?;
            (remote_ref_name == wanted_ref.as_str()).then_some(mapping.remote.as_id()?)
        })
        .map(|id| from_gix_oid(id.into()))
        .ok_or_else(|| GitError::FetchFailed {
            remote: remote.to_owned(),
            message: format!("remote has no branch '{branch}'"),
        })
}

pub fn push_branch(
    repo: &GixRepo,
    remote: &str,
    local_ref: &str,
    remote_ref: &str,
    expected_remote_oid: Option<GitOid>,
) -> Result<(), GitError> {
    let remote_handle =
        repo.repo
            .find_remote(remote)
            .map_err(|e| GitError::PushFailed {
                remote: remote.to_owned(),
                message: format!("unknown remote: {e}"),
            })?;

    let refspec = format!("{local_ref}:{remote_ref}");
    let remote_handle = remote_handle
        .with_refspecs([refspec.as_str()], Direction::Push)
        .map_err(|e| GitError::PushFailed {
            remote: remote.to_owned(),
            message: format!("invalid refspec '{refspec}': {e}"),
        })?;

    let connection = remote_handle
        .connect(Direction::Push)
        .map_err(|e| GitError::PushFailed {
            remote: remote.to_owned(),
            message: format!("connect failed: {e}"),
        })?;

    // The remote is the final arbiter of this CAS (spec §5: "remote is
    // assumed to serialize accepts of pushes via its own compare-and-swap
    // on the ref"); `expected_remote_oid` is only used to build an
    // informative rejection message when the remote's own check fails.
    connection
        .push(&gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("non-fast-forward") || msg.contains("rejected") || msg.contains("stale") {
                GitError::PushRejected {
                    remote: remote.to_owned(),
                    message: match expected_remote_oid {
                        Some(oid) => format!("expected remote at {}: {msg}", oid.short()),
                        None => msg,
                    },
                }
            } else {
                GitError::PushFailed {
                    remote: remote.to_owned(),
                    message: msg,
                }
            }
        })?;
    Ok(())
}
