//! Offer and task validation
//!
//! Both pipelines are plain lists of functions run in declared order;
//! the first error aborts the pipeline. Order matters: the usage check
//! assumes the executor info was already validated.

use crate::ids::{FrameworkId, OfferId};
use crate::master::framework::Framework;
use crate::master::worker::Worker;
use crate::master::Master;
use crate::resources::{Resource, Resources, Value, VolumeMode, ANY_ROLE};
use crate::state::TaskInfo;
use std::collections::HashSet;

// ---------------------------------------------------------------
// Offer validation
// ---------------------------------------------------------------

pub struct OfferValidationContext<'a> {
    pub master: &'a Master,
    pub framework_id: &'a FrameworkId,
    pub offer_ids: &'a [OfferId],
}

type OfferValidator = fn(&OfferValidationContext) -> Option<String>;

const OFFER_VALIDATORS: &[OfferValidator] = &[
    offers_exist,
    offers_owned_by_framework,
    offers_on_one_worker,
    offer_ids_unique,
];

/// Run the offer pipeline; None means the launch may proceed.
pub fn validate_offers(
    master: &Master,
    framework_id: &FrameworkId,
    offer_ids: &[OfferId],
) -> Option<String> {
    let context = OfferValidationContext {
        master,
        framework_id,
        offer_ids,
    };
    for validator in OFFER_VALIDATORS {
        if let Some(error) = validator(&context) {
            return Some(error);
        }
    }
    None
}

fn offers_exist(ctx: &OfferValidationContext) -> Option<String> {
    for offer_id in ctx.offer_ids {
        if !ctx.master.offers.contains_key(offer_id) {
            return Some(format!("Offer {} is no longer valid", offer_id));
        }
    }
    None
}

fn offers_owned_by_framework(ctx: &OfferValidationContext) -> Option<String> {
    for offer_id in ctx.offer_ids {
        let offer = ctx.master.offers.get(offer_id)?;
        if &offer.framework_id != ctx.framework_id {
            return Some(format!(
                "Offer {} has invalid framework {}: expected {}",
                offer_id, offer.framework_id, ctx.framework_id
            ));
        }
    }
    None
}

fn offers_on_one_worker(ctx: &OfferValidationContext) -> Option<String> {
    let mut worker_id = None;
    for offer_id in ctx.offer_ids {
        let offer = ctx.master.offers.get(offer_id)?;
        match &worker_id {
            None => worker_id = Some(offer.worker_id.clone()),
            Some(expected) if expected != &offer.worker_id => {
                return Some("Aggregated offers must belong to one single worker".to_string());
            }
            _ => {}
        }
    }
    None
}

fn offer_ids_unique(ctx: &OfferValidationContext) -> Option<String> {
    let mut seen = HashSet::new();
    for offer_id in ctx.offer_ids {
        if !seen.insert(offer_id) {
            return Some("Aggregated offers must have unique offer ids".to_string());
        }
    }
    None
}

// ---------------------------------------------------------------
// Task validation
// ---------------------------------------------------------------

pub struct TaskValidationContext<'a> {
    pub task: &'a TaskInfo,
    pub framework: &'a Framework,
    pub worker: &'a Worker,
    /// Offered resources for the batch, transformed by disk
    /// acquisitions so far.
    pub offered: &'a Resources,
    /// Resources consumed by tasks already accepted in this batch.
    pub used: &'a Resources,
}

type TaskValidator = fn(&TaskValidationContext) -> Option<String>;

const TASK_VALIDATORS: &[TaskValidator] = &[
    task_id_well_formed,
    worker_id_matches,
    task_id_unique,
    checkpoint_compatible,
    executor_info_valid,
    resources_valid,
    resource_usage_fits,
];

/// Run the task pipeline; None means the task may launch.
pub fn validate_task(ctx: &TaskValidationContext) -> Option<String> {
    for validator in TASK_VALIDATORS {
        if let Some(error) = validator(ctx) {
            return Some(error);
        }
    }
    None
}

fn invalid_id_chars(id: &str) -> bool {
    id.chars().any(|c| c.is_control() || c == '/' || c == '\\')
}

fn task_id_well_formed(ctx: &TaskValidationContext) -> Option<String> {
    let id = ctx.task.task_id.as_str();
    if id.is_empty() {
        return Some("Task has an empty ID".to_string());
    }
    if invalid_id_chars(id) {
        return Some(format!(
            "Task ID '{}' contains invalid characters",
            ctx.task.task_id
        ));
    }
    None
}

fn worker_id_matches(ctx: &TaskValidationContext) -> Option<String> {
    if ctx.task.worker_id != ctx.worker.id {
        return Some(format!(
            "Task uses invalid worker {}: expected {}",
            ctx.task.worker_id, ctx.worker.id
        ));
    }
    None
}

fn task_id_unique(ctx: &TaskValidationContext) -> Option<String> {
    let id = &ctx.task.task_id;
    if ctx.framework.has_task(id) || ctx.framework.pending_tasks.contains_key(id) {
        return Some(format!("Task has duplicate ID: {}", id));
    }
    None
}

fn checkpoint_compatible(ctx: &TaskValidationContext) -> Option<String> {
    if ctx.framework.info.checkpoint && !ctx.worker.info.checkpoint {
        return Some(format!(
            "Task asked to be checkpointed but worker {} does not support checkpointing",
            ctx.worker.id
        ));
    }
    None
}

fn executor_info_valid(ctx: &TaskValidationContext) -> Option<String> {
    match (&ctx.task.command, &ctx.task.executor) {
        (Some(_), Some(_)) => {
            return Some("Task should have at most one of CommandInfo or ExecutorInfo".to_string())
        }
        (None, None) => {
            return Some(
                "Task should have at least one of CommandInfo or ExecutorInfo".to_string(),
            )
        }
        _ => {}
    }

    if let Some(executor) = &ctx.task.executor {
        if let Some(framework_id) = &executor.framework_id {
            if framework_id != &ctx.framework.id {
                return Some(format!(
                    "ExecutorInfo has an invalid framework {}: expected {}",
                    framework_id, ctx.framework.id
                ));
            }
        }

        // A known executor id must describe the identical executor.
        if let Some(existing) = ctx
            .worker
            .executors
            .get(&ctx.framework.id)
            .and_then(|executors| executors.get(&executor.executor_id))
        {
            let mut provided = executor.clone();
            provided.framework_id = existing.framework_id.clone();
            if &provided != existing {
                return Some(format!(
                    "ExecutorInfo is not compatible with existing executor '{}' on worker {}",
                    executor.executor_id, ctx.worker.id
                ));
            }
        }
    }
    None
}

fn resources_valid(ctx: &TaskValidationContext) -> Option<String> {
    if let Err(error) = ctx.task.resources.validate() {
        return Some(format!("Task uses invalid resources: {}", error));
    }
    if let Some(executor) = &ctx.task.executor {
        if let Err(error) = executor.resources.validate() {
            return Some(format!("Executor uses invalid resources: {}", error));
        }
    }

    // Disk rules, per resource and across the task.
    let mut persistence_ids: HashSet<(String, String)> = HashSet::new();
    for resource in ctx.task.resources.iter() {
        let Some(disk) = &resource.disk else {
            continue;
        };
        match &disk.persistence {
            Some(id) => {
                if resource.role == ANY_ROLE {
                    return Some(format!(
                        "Persistent disk volume '{}' is disallowed for the '*' role",
                        id
                    ));
                }
                if invalid_id_chars(id) {
                    return Some(format!(
                        "Persistence ID '{}' contains invalid characters",
                        id
                    ));
                }
                let Some(volume) = &disk.volume else {
                    return Some(format!(
                        "Persistent disk volume '{}' requires a volume",
                        id
                    ));
                };
                if volume.mode != VolumeMode::ReadWrite {
                    return Some(format!("Persistent disk volume '{}' is not RW", id));
                }
                if volume.host_path.is_some() {
                    return Some(format!(
                        "Persistent disk volume '{}' should not have a host path",
                        id
                    ));
                }
                if !persistence_ids.insert((resource.role.clone(), id.clone())) {
                    return Some(format!("Duplicated persistence ID '{}'", id));
                }
            }
            None => {
                if disk.volume.is_some() {
                    return Some("Non-persistent disk volumes are disallowed".to_string());
                }
            }
        }
    }
    None
}

fn resource_usage_fits(ctx: &TaskValidationContext) -> Option<String> {
    let mut required = ctx.task.resources.clone();
    if let Some(executor) = &ctx.task.executor {
        if !ctx
            .worker
            .has_executor(&ctx.framework.id, &executor.executor_id)
        {
            required.add_all(&executor.resources);
        }
    }

    if required.is_empty() {
        return Some("Task uses no resources".to_string());
    }

    // Persistent disks not literally offered are acquired implicitly,
    // transforming the offered resources.
    let transformed = match acquire_persistent_disks(ctx.offered, &required) {
        Ok((transformed, _)) => transformed,
        Err(error) => return Some(error),
    };

    let available = transformed.minus(ctx.used);
    if !available.contains(&required) {
        return Some(format!(
            "Task uses more resources ({}) than available/offered ({})",
            required, available
        ));
    }
    None
}

/// Transform `offered` so it contains every persistent disk in
/// `requested`: each missing volume converts an equally-sized plain
/// disk of the same role. Returns the transformed resources and the
/// volumes acquired.
pub fn acquire_persistent_disks(
    offered: &Resources,
    requested: &Resources,
) -> Result<(Resources, Vec<Resource>), String> {
    let mut transformed = offered.clone();
    let mut acquired = Vec::new();

    for disk in requested.persistent_disks() {
        if transformed.contains_resource(disk) {
            continue;
        }

        let id = disk
            .disk
            .as_ref()
            .and_then(|d| d.persistence.clone())
            .unwrap_or_default();

        // The same persistence id in the offer with different shape
        // means the volume already exists and conflicts.
        let conflict = transformed.persistent_disks().iter().any(|existing| {
            existing.role == disk.role
                && existing
                    .disk
                    .as_ref()
                    .and_then(|d| d.persistence.as_ref())
                    == Some(&id)
        });
        if conflict {
            return Err(format!(
                "Duplicated persistence ID '{}' for role '{}'",
                id, disk.role
            ));
        }

        let size = match &disk.value {
            Value::Scalar(size) => *size,
            _ => return Err(format!("Persistent disk volume '{}' is not a scalar", id)),
        };
        let plain = Resource::scalar("disk", &disk.role, size);
        if !transformed.contains_resource(&plain) {
            return Err(format!(
                "Insufficient disk resources to acquire persistent volume '{}' ({} MB for role '{}')",
                id, size, disk.role
            ));
        }

        transformed.subtract(&plain);
        transformed.add((*disk).clone());
        acquired.push((*disk).clone());
    }

    Ok((transformed, acquired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Resource;

    // === Persistent disk acquisition ===

    #[test]
    fn test_acquire_converts_plain_disk() {
        let offered = Resources::parse("cpus:1;disk(prod):500", "*").unwrap();
        let volume = Resource::persistent_disk("prod", 200.0, "vol-1", "/data");
        let mut requested = Resources::new();
        requested.add(volume.clone());

        let (transformed, acquired) = acquire_persistent_disks(&offered, &requested).unwrap();

        assert_eq!(acquired, vec![volume.clone()]);
        assert!(transformed.contains_resource(&volume));
        assert!(transformed.contains_resource(&Resource::scalar("disk", "prod", 300.0)));
        assert!(!transformed.contains_resource(&Resource::scalar("disk", "prod", 301.0)));
    }

    #[test]
    fn test_acquire_noop_when_volume_already_offered() {
        let volume = Resource::persistent_disk("prod", 200.0, "vol-1", "/data");
        let mut offered = Resources::new();
        offered.add(volume.clone());

        let mut requested = Resources::new();
        requested.add(volume);

        let (transformed, acquired) = acquire_persistent_disks(&offered, &requested).unwrap();
        assert!(acquired.is_empty());
        assert_eq!(transformed, offered);
    }

    #[test]
    fn test_acquire_rejects_conflicting_persistence_id() {
        let mut offered = Resources::new();
        offered.add(Resource::persistent_disk("prod", 100.0, "vol-1", "/data"));
        offered.add(Resource::scalar("disk", "prod", 500.0));

        // Same id and role, different size: conflict.
        let mut requested = Resources::new();
        requested.add(Resource::persistent_disk("prod", 300.0, "vol-1", "/data"));

        assert!(acquire_persistent_disks(&offered, &requested).is_err());
    }

    #[test]
    fn test_acquire_fails_without_plain_disk() {
        let offered = Resources::parse("cpus:1;disk(prod):100", "*").unwrap();
        let mut requested = Resources::new();
        requested.add(Resource::persistent_disk("prod", 200.0, "vol-1", "/data"));

        assert!(acquire_persistent_disks(&offered, &requested).is_err());
    }
}
