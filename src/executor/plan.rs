//! Job Plan
//!
//! Validates a flow's jobs and tracks which of them are ready to run.
//!
//! Validation rules:
//! 1. Job names are unique
//! 2. Every job names a registered component and sets its required properties
//! 3. Every `previous` entry names a job of the same flow
//! 4. Dependencies are acyclic (Kahn's algorithm)

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use thiserror::Error;

use crate::component::ComponentRegistry;
use crate::model::Job;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' depends on unknown job '{reference}'")]
    UnknownReference { job: String, reference: String },

    #[error("Job '{job}' uses unknown component '{component}'")]
    UnknownComponent { job: String, component: String },

    #[error("Job '{job}' is missing required properties: {}", .missing.join(", "))]
    MissingProperties { job: String, missing: Vec<String> },

    #[error("Cyclic dependency detected among jobs")]
    CyclicDependency,
}

pub struct JobPlan {
    /// Jobs in topological order
    jobs: Vec<Job>,
    started: HashSet<String>,
    completed: HashSet<String>,
}

impl JobPlan {
    pub fn build(jobs: Vec<Job>, components: &ComponentRegistry) -> Result<Self, PlanError> {
        let mut names: HashSet<&str> = HashSet::new();
        for job in &jobs {
            if !names.insert(job.name.as_str()) {
                return Err(PlanError::DuplicateJob(job.name.clone()));
            }
        }

        for job in &jobs {
            let component = components.get(&job.component).ok_or_else(|| {
                PlanError::UnknownComponent {
                    job: job.name.clone(),
                    component: job.component.clone(),
                }
            })?;

            let missing = component.definition().missing_properties(job);
            if !missing.is_empty() {
                return Err(PlanError::MissingProperties {
                    job: job.name.clone(),
                    missing,
                });
            }

            for reference in &job.previous {
                if !names.contains(reference.as_str()) {
                    return Err(PlanError::UnknownReference {
                        job: job.name.clone(),
                        reference: reference.clone(),
                    });
                }
            }
        }

        let jobs = topological_order(jobs)?;
        debug!(
            "Job order: {:?}",
            jobs.iter().map(|j| &j.name).collect::<Vec<_>>()
        );

        Ok(Self {
            jobs,
            started: HashSet::new(),
            completed: HashSet::new(),
        })
    }

    /// Jobs not yet started whose dependencies have all completed.
    pub fn ready(&self) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|job| !self.started.contains(&job.name))
            .filter(|job| job.previous.iter().all(|p| self.completed.contains(p)))
            .cloned()
            .collect()
    }

    pub fn mark_started(&mut self, name: &str) {
        self.started.insert(name.to_string());
    }

    pub fn mark_completed(&mut self, name: &str) {
        self.completed.insert(name.to_string());
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.jobs.len()
    }

    pub fn order(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn topological_order(jobs: Vec<Job>) -> Result<Vec<Job>, PlanError> {
    let mut in_degree: HashMap<String, usize> = jobs
        .iter()
        .map(|j| (j.name.clone(), j.previous.len()))
        .collect();

    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    for job in &jobs {
        for previous in &job.previous {
            successors
                .entry(previous.clone())
                .or_default()
                .push(job.name.clone());
        }
    }

    let mut queue: VecDeque<String> = jobs
        .iter()
        .filter(|j| j.previous.is_empty())
        .map(|j| j.name.clone())
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(jobs.len());
    while let Some(current) = queue.pop_front() {
        for successor in successors.get(&current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(successor) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(successor.clone());
                }
            }
        }
        order.push(current);
    }

    if order.len() != jobs.len() {
        return Err(PlanError::CyclicDependency);
    }

    let mut by_name: HashMap<String, Job> =
        jobs.into_iter().map(|j| (j.name.clone(), j)).collect();
    Ok(order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect())
}
