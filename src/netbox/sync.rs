use anyhow::Result;

use crate::models::{Intent, InterfaceIntent, ObservedInterface};
use crate::utils::mask_to_prefix;

use super::client::NetBoxClient;
use super::types::{NbInterface, PromotionCounts};

/// Interface state promotion writes to NetBox
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InterfaceSpec<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub enabled: bool,
    pub mac_address: Option<&'a str>,
}

/// What promotion does with one interface
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InterfaceAction<'a> {
    Create(InterfaceSpec<'a>),
    Update { id: i64, spec: InterfaceSpec<'a> },
}

/// Interfaces as read back from the device, plus any declared interface the
/// device did not report. Without a read-back the intent is used as is.
pub(crate) fn desired_interfaces<'a>(intent: &'a Intent, observed: &'a [ObservedInterface]) -> Vec<InterfaceSpec<'a>> {
    let mut specs: Vec<InterfaceSpec<'a>> = observed
        .iter()
        .map(|o| InterfaceSpec {
            name: o.name.as_str(),
            description: o.description.as_str(),
            enabled: o.enabled,
            mac_address: o.mac_address.as_deref(),
        })
        .collect();
    for (name, intf) in &intent.interfaces {
        if specs.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        specs.push(InterfaceSpec {
            name: name.as_str(),
            description: intf.description.as_str(),
            enabled: intf.is_up(),
            mac_address: None,
        });
    }
    specs
}

fn drifted(nb: &NbInterface, spec: &InterfaceSpec<'_>) -> bool {
    let mac_drift = match (spec.mac_address, nb.mac_address.as_deref()) {
        (Some(want), Some(have)) => !want.eq_ignore_ascii_case(have),
        (Some(_), None) => true,
        (None, _) => false,
    };
    nb.description != spec.description || mac_drift
}

/// Interfaces missing from NetBox are created; existing ones whose
/// description or MAC address drifted are updated
pub(crate) fn plan_interfaces<'a>(existing: &[NbInterface], desired: Vec<InterfaceSpec<'a>>) -> Vec<InterfaceAction<'a>> {
    desired
        .into_iter()
        .filter_map(|spec| match existing.iter().find(|nb| nb.name == spec.name) {
            None => Some(InterfaceAction::Create(spec)),
            Some(nb) if drifted(nb, &spec) => Some(InterfaceAction::Update { id: nb.id, spec }),
            Some(_) => None,
        })
        .collect()
}

/// "<addr> <mask>" as NetBox CIDR notation
pub(crate) fn interface_cidr(intf: &InterfaceIntent) -> Option<String> {
    let (addr, mask) = intf.address_and_mask()?;
    Some(format!("{}/{}", addr, mask_to_prefix(mask)?))
}

/// Sync a validated device's interfaces and addresses into NetBox and move
/// it to the production role
pub async fn promote_device(
    nb: &NetBoxClient,
    device_id: i64,
    device_name: &str,
    intent: &Intent,
    observed: &[ObservedInterface],
    production_role: &str,
) -> Result<PromotionCounts> {
    let mut counts = PromotionCounts::default();

    let existing = nb.list_interfaces_by_device(device_id).await?;
    for action in plan_interfaces(&existing, desired_interfaces(intent, observed)) {
        match action {
            InterfaceAction::Create(spec) => {
                tracing::info!("{}: creating NetBox interface {}", device_name, spec.name);
                match nb
                    .create_interface(device_id, spec.name, spec.description, spec.enabled, spec.mac_address)
                    .await
                {
                    Ok(_) => counts.created += 1,
                    Err(e) => counts.errors.push(format!("{}: create interface: {}", spec.name, e)),
                }
            }
            InterfaceAction::Update { id, spec } => {
                tracing::info!("{}: updating NetBox interface {}", device_name, spec.name);
                match nb.update_interface(id, spec.description, spec.enabled, spec.mac_address).await {
                    Ok(()) => counts.updated += 1,
                    Err(e) => counts.errors.push(format!("{}: update interface: {}", spec.name, e)),
                }
            }
        }
    }

    // Re-read so newly created interfaces have ids
    let interfaces = nb.list_interfaces_by_device(device_id).await?;
    for (name, intf) in &intent.interfaces {
        let Some(cidr) = interface_cidr(intf) else { continue };
        let Some(nb_intf) = interfaces.iter().find(|i| i.name == *name) else {
            counts.errors.push(format!("{}: interface missing after sync", name));
            continue;
        };
        match nb.find_ip_address(&cidr).await {
            Ok(Some(_)) => {
                tracing::warn!("{}: {} exists - verify manually in NetBox", device_name, cidr);
            }
            Ok(None) => match nb.create_ip_address(&cidr, nb_intf.id).await {
                Ok(_) => counts.created += 1,
                Err(e) => counts.errors.push(format!("{}: create address {}: {}", name, cidr, e)),
            },
            Err(e) => counts.errors.push(format!("{}: address lookup {}: {}", name, cidr, e)),
        }
    }

    let role = nb
        .get_role_by_slug(production_role)
        .await?
        .ok_or_else(|| anyhow::anyhow!("device role '{}' not found", production_role))?;
    nb.update_device(device_id, &serde_json::json!({ "role": role.id })).await?;
    tracing::info!("{}: moved to role {}", device_name, role.slug);

    Ok(counts)
}
