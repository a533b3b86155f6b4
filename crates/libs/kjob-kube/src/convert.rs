//! Conversions between kjob types and Kubernetes API objects.

use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Container, ContainerState as KubeContainerState, EnvVar, Pod, PodSpec,
            PodTemplateSpec, SecurityContext,
        },
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kjob::model::{
    ContainerState, ContainerStatus, KIND_JOB, Labels, OwnerReference, PodSummary,
    WorkloadHandle, WorkloadStatus,
};
use kjob_config::{ContainerTemplate, WorkloadSpec};

/// Label the Job controller puts on every pod it creates.
pub const JOB_NAME_LABEL: &str = "job-name";

const RESTART_POLICY_NEVER: &str = "Never";
const CONDITION_FAILED: &str = "Failed";
const CONDITION_TRUE: &str = "True";

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

fn container(template: &ContainerTemplate) -> Container {
    let env: Vec<EnvVar> = template
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    let security_context = template.security_context.as_ref().map(|sc| SecurityContext {
        run_as_user: sc.run_as_user,
        run_as_group: sc.run_as_group,
        privileged: sc.privileged,
        ..Default::default()
    });
    Container {
        name: template.name.clone(),
        image: Some(template.image.clone()),
        command: non_empty(template.command.clone()),
        args: non_empty(template.args.clone()),
        env: non_empty(env),
        working_dir: template.working_dir.clone(),
        security_context,
        ..Default::default()
    }
}

/// Build the Job submitted for `spec`. Pods never restart in place.
pub fn job_from_spec(spec: &WorkloadSpec) -> Job {
    let labels = (!spec.selector.is_empty()).then(|| spec.selector.clone());
    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: labels.clone(),
            ..Default::default()
        },
        spec: Some(JobSpec {
            completions: spec.completions,
            parallelism: spec.parallelism,
            backoff_limit: Some(spec.backoff_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some(String::from(RESTART_POLICY_NEVER)),
                    containers: spec.containers.iter().map(container).collect(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Handle of a created Job.
///
/// The selector is the one the server resolved for the Job, then the
/// workload's own labels, then the `job-name` label. Returns `None` when the
/// server did not assign a uid.
pub fn handle_from_job(spec: &WorkloadSpec, job: &Job) -> Option<WorkloadHandle> {
    let uid = job.metadata.uid.clone()?;
    let selector = job
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .and_then(|selector| selector.match_labels.clone())
        .filter(|labels| !labels.is_empty())
        .or_else(|| (!spec.selector.is_empty()).then(|| spec.selector.clone()))
        .unwrap_or_else(|| Labels::from([(String::from(JOB_NAME_LABEL), spec.name.clone())]));
    Some(WorkloadHandle {
        namespace: job
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| spec.namespace.clone()),
        name: job.metadata.name.clone().unwrap_or_else(|| spec.name.clone()),
        uid,
        kind: String::from(KIND_JOB),
        selector,
    })
}

/// Counters of a Job. A `Failed=True` condition is reported as the failure.
pub fn status_from_job(job: &Job) -> WorkloadStatus {
    let completions = job.spec.as_ref().and_then(|spec| spec.completions);
    let Some(status) = &job.status else {
        return WorkloadStatus {
            completions,
            ..Default::default()
        };
    };
    let failure = status
        .conditions
        .iter()
        .flatten()
        .find(|condition| condition.type_ == CONDITION_FAILED && condition.status == CONDITION_TRUE)
        .map(|condition| {
            condition
                .reason
                .clone()
                .or_else(|| condition.message.clone())
                .unwrap_or_else(|| String::from(CONDITION_FAILED))
        });
    WorkloadStatus {
        succeeded: status.succeeded.unwrap_or(0),
        active: status.active.unwrap_or(0),
        failed: status.failed.unwrap_or(0),
        completions,
        failure,
    }
}

fn container_state(state: Option<&KubeContainerState>) -> ContainerState {
    let Some(state) = state else {
        return ContainerState::waiting();
    };
    if let Some(terminated) = &state.terminated {
        return ContainerState::Terminated {
            exit_code: terminated.exit_code,
            reason: terminated.reason.clone(),
        };
    }
    if state.running.is_some() {
        return ContainerState::Running;
    }
    ContainerState::Waiting {
        reason: state.waiting.as_ref().and_then(|waiting| waiting.reason.clone()),
    }
}

/// Summary of a pod. Only regular containers are reported.
pub fn pod_summary(pod: &Pod) -> PodSummary {
    let metadata = &pod.metadata;
    let containers = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|status| ContainerStatus::new(&status.name, container_state(status.state.as_ref())))
        .collect();
    PodSummary {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: metadata.namespace.clone().unwrap_or_default(),
        labels: metadata.labels.clone().unwrap_or_default(),
        owner_references: metadata
            .owner_references
            .iter()
            .flatten()
            .map(|owner| OwnerReference {
                kind: owner.kind.clone(),
                name: owner.name.clone(),
                uid: owner.uid.clone(),
            })
            .collect(),
        containers,
    }
}
