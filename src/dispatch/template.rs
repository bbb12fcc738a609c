//! Scheduler-resolved path templates
//!
//! HTCondor expands `$(Cluster)` and `$(Process)` in submit descriptions. We
//! keep those as typed placeholders so the same template can be rendered for
//! the scheduler and resolved locally once the cluster id is known.

use std::fmt;

use crate::models::ClusterId;

/// Macro expanded by the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    Cluster,
    Process,
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Cluster => f.write_str("$(Cluster)"),
            Placeholder::Process => f.write_str("$(Process)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// A file name containing scheduler placeholders
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LogTemplate {
    segments: Vec<Segment>,
}

impl LogTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Literal(text.into()));
        self
    }

    pub fn slot(mut self, placeholder: Placeholder) -> Self {
        self.segments.push(Segment::Slot(placeholder));
        self
    }

    /// `job_<id>_condor_$(Cluster).log`
    pub fn job_log(job_id: i64) -> Self {
        Self::new()
            .literal(format!("job_{job_id}_condor_"))
            .slot(Placeholder::Cluster)
            .literal(".log")
    }

    /// `job_<id>_condor_$(Cluster)-$(Process).<ext>`
    pub fn task_log(job_id: i64, extension: &str) -> Self {
        Self::new()
            .literal(format!("job_{job_id}_condor_"))
            .slot(Placeholder::Cluster)
            .literal("-")
            .slot(Placeholder::Process)
            .literal(format!(".{extension}"))
    }

    /// Text for the submit description, placeholders left for the scheduler
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Substitute the cluster id. A process placeholder is resolved only when
    /// `process` is given and otherwise left in place.
    pub fn resolve(&self, cluster: ClusterId, process: Option<u32>) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Slot(Placeholder::Cluster) => cluster.to_string(),
                Segment::Slot(Placeholder::Process) => match process {
                    Some(p) => p.to_string(),
                    None => Placeholder::Process.to_string(),
                },
            })
            .collect()
    }
}

impl fmt::Display for LogTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Slot(placeholder) => write!(f, "{placeholder}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_for_scheduler() {
        assert_eq!(LogTemplate::job_log(12).render(), "job_12_condor_$(Cluster).log");
        assert_eq!(
            LogTemplate::task_log(12, "err").render(),
            "job_12_condor_$(Cluster)-$(Process).err"
        );
    }

    #[test]
    fn test_resolve_cluster() {
        let template = LogTemplate::job_log(12);
        assert_eq!(template.resolve(ClusterId(4821), None), "job_12_condor_4821.log");
    }

    #[test]
    fn test_resolve_process() {
        let template = LogTemplate::task_log(3, "out");
        assert_eq!(
            template.resolve(ClusterId(9), None),
            "job_3_condor_9-$(Process).out"
        );
        assert_eq!(template.resolve(ClusterId(9), Some(2)), "job_3_condor_9-2.out");
        assert_eq!(
            LogTemplate::job_log(3).resolve(ClusterId(9), Some(2)),
            "job_3_condor_9.log"
        );
    }
}
