//! 作业依赖图
//!
//! 邻接表 + 入度表；Kahn 算法检测环，入度为 0 的剩余节点即构成环。

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::job::{JobId, JobStatus};

#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    /// 作业 -> 依赖它的作业
    dependents: BTreeMap<JobId, BTreeSet<JobId>>,
    /// 作业 -> 它的依赖
    dependencies: BTreeMap<JobId, BTreeSet<JobId>>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_jobs<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = (&'a JobId, &'a [JobId])>,
    {
        let mut graph = Self::new();
        for (id, deps) in jobs {
            graph.add(id.clone(), deps.iter().cloned());
        }
        graph
    }

    pub fn add(&mut self, job_id: JobId, depends_on: impl IntoIterator<Item = JobId>) {
        self.dependents.entry(job_id.clone()).or_default();
        let deps = self.dependencies.entry(job_id.clone()).or_default();
        for dep in depends_on {
            deps.insert(dep.clone());
            self.dependents.entry(dep).or_default().insert(job_id.clone());
        }
    }

    /// 返回构成环（或依赖环）的作业；无环时为 None
    pub fn find_cycle(&self) -> Option<Vec<JobId>> {
        let mut in_degree: BTreeMap<&JobId, usize> = self
            .dependents
            .keys()
            .map(|id| (id, self.dependencies.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<&JobId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(children) = self.dependents.get(id) {
                for child in children {
                    if let Some(d) = in_degree.get_mut(child) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if visited == in_degree.len() {
            None
        } else {
            Some(
                in_degree
                    .into_iter()
                    .filter(|(_, d)| *d > 0)
                    .map(|(id, _)| id.clone())
                    .collect(),
            )
        }
    }

    /// 可以开始的作业：自身为 QUEUED / CHECKPOINTED 且所有依赖已 COMPLETED
    pub fn ready_jobs(&self, statuses: &BTreeMap<JobId, JobStatus>) -> Vec<JobId> {
        self.dependencies
            .iter()
            .filter(|(id, _)| {
                matches!(
                    statuses.get(*id),
                    Some(JobStatus::Queued) | Some(JobStatus::Checkpointed)
                )
            })
            .filter(|(_, deps)| {
                deps.iter()
                    .all(|d| statuses.get(d) == Some(&JobStatus::Completed))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}
