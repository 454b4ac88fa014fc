//! Dossier find-or-create and the explicit business actions.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::model::{Dossier, DossierStatus};
use crate::intake::store::{Store, Tx};

/// Trim, drop a `Name <...>` wrapper, lowercase. None when nothing is left.
pub fn normalize_email(raw: &str) -> Option<String> {
    let addr = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw,
    };
    let email = addr.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

/// Display name from a `Name <addr>` sender, if any.
pub fn display_name_of(raw: &str) -> Option<String> {
    let open = raw.find('<')?;
    let name = raw[..open].trim().trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Find-or-create inside an open transaction. A unique-index conflict on
/// insert re-reads the winner.
pub fn resolve_in(
    tx: &mut Tx<'_>,
    tenant_id: u64,
    email: &str,
    display_name: Option<&str>,
) -> IntakeResult<Option<Dossier>> {
    let Some(email) = normalize_email(email) else {
        return Ok(None);
    };
    let display_name = display_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(ToString::to_string);

    if let Some(mut existing) = tx.find_dossier(tenant_id, &email) {
        if existing.display_name.is_none() && display_name.is_some() {
            existing.display_name = display_name;
            existing = tx.update_dossier(existing)?;
        }
        return Ok(Some(existing));
    }

    match tx.insert_dossier(tenant_id, Some(email.clone()), display_name) {
        Ok(created) => {
            tracing::info!(tenant_id, dossier_id = created.id, "dossier created");
            Ok(Some(created))
        }
        Err(IntakeError::Conflict(_)) => match tx.find_dossier(tenant_id, &email) {
            Some(winner) => Ok(Some(winner)),
            None => Err(IntakeError::DossierRaceLost { tenant_id }),
        },
        Err(err) => Err(err),
    }
}

/// Standalone find-or-create; retries once, then reports the race as
/// transient.
pub fn resolve(
    store: &Store,
    tenant_id: u64,
    email: &str,
    display_name: Option<&str>,
) -> IntakeResult<Option<Dossier>> {
    match store.transaction(|tx| resolve_in(tx, tenant_id, email, display_name)) {
        Err(IntakeError::Conflict(_) | IntakeError::DossierRaceLost { .. }) => store
            .transaction(|tx| resolve_in(tx, tenant_id, email, display_name))
            .map_err(|err| match err {
                IntakeError::Conflict(_) => IntakeError::DossierRaceLost { tenant_id },
                other => other,
            }),
        other => other,
    }
}

pub fn close(store: &Store, dossier_id: u64) -> IntakeResult<Dossier> {
    store.transaction(|tx| {
        let mut dossier = tx.dossier(dossier_id)?;
        if dossier.closed_at.is_some() {
            return Ok(dossier);
        }
        dossier.closed_at = Some(tx.now());
        tx.update_dossier(dossier)
    })
}

fn decide(store: &Store, dossier_id: u64, to: DossierStatus) -> IntakeResult<Dossier> {
    store.transaction(|tx| {
        let mut dossier = tx.dossier(dossier_id)?;
        if dossier.status.is_terminal() {
            return Err(IntakeError::DossierFinalized(dossier_id));
        }
        let allowed = matches!(to, DossierStatus::Validated | DossierStatus::Rejected)
            && dossier.status == DossierStatus::ToValidate;
        if !allowed {
            return Err(IntakeError::InvalidTransition {
                id: dossier_id,
                from: dossier.status.as_str(),
                to: to.as_str(),
            });
        }
        dossier.status = to;
        tracing::info!(dossier_id, status = to.as_str(), "dossier decided");
        tx.update_dossier(dossier)
    })
}

/// TO_VALIDATE -> VALIDATED.
pub fn validate(store: &Store, dossier_id: u64) -> IntakeResult<Dossier> {
    decide(store, dossier_id, DossierStatus::Validated)
}

/// TO_VALIDATE -> REJECTED.
pub fn reject(store: &Store, dossier_id: u64) -> IntakeResult<Dossier> {
    decide(store, dossier_id, DossierStatus::Rejected)
}
