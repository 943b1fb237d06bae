use crate::context::ExecutionContext;
use crate::document::Document;
use crate::module::{Module, ModuleError, ModuleResult};

enum Selection {
    All,
    Pipelines(Vec<String>),
}

/// Replaces the input with documents stored by earlier pipelines.
///
/// A pipeline that is registered but has not produced a result yet (it runs
/// later, or it is the current one) contributes nothing. Naming a pipeline
/// that is not registered is an error.
pub struct Documents {
    selection: Selection,
}

impl Documents {
    /// Documents of one pipeline.
    pub fn pipeline(name: impl Into<String>) -> Self {
        Self {
            selection: Selection::Pipelines(vec![name.into()]),
        }
    }

    /// Documents of several pipelines, in the order given.
    pub fn pipelines<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selection: Selection::Pipelines(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Documents of every completed pipeline, in registration order.
    pub fn all() -> Self {
        Self {
            selection: Selection::All,
        }
    }
}

impl Module for Documents {
    fn execute(&self, _inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        let stored = context.documents();
        match &self.selection {
            Selection::All => Ok(stored.all().cloned().collect()),
            Selection::Pipelines(names) => {
                let mut outputs = Vec::new();
                for name in names {
                    let docs = stored
                        .get(name)
                        .ok_or_else(|| ModuleError::msg(format!("no pipeline named {name:?}")))?;
                    outputs.extend_from_slice(docs);
                }
                Ok(outputs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::modules;
    use crate::test_helpers::{sources, text_docs};

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.add_pipeline(Some("Posts"), modules![text_docs(&["p1", "p2"])]).unwrap();
        engine.add_pipeline(Some("Pages"), modules![text_docs(&["about"])]).unwrap();
        engine
    }

    #[test]
    fn reads_named_pipeline() {
        let mut engine = engine();
        engine.add_pipeline(Some("Feed"), modules![Documents::pipeline("posts")]).unwrap();
        engine.execute().unwrap();

        let feed = engine.documents().get("Feed").unwrap();
        assert_eq!(sources(feed), vec!["p1", "p2"]);
        assert!(feed[0].ptr_eq(&engine.documents().get("Posts").unwrap()[0]));
    }

    #[test]
    fn reads_several_pipelines_in_given_order() {
        let mut engine = engine();
        engine
            .add_pipeline(Some("Sitemap"), modules![Documents::pipelines(["Pages", "Posts"])])
            .unwrap();
        engine.execute().unwrap();
        assert_eq!(
            sources(engine.documents().get("Sitemap").unwrap()),
            vec!["about", "p1", "p2"]
        );
    }

    #[test]
    fn all_excludes_pipelines_not_yet_run() {
        let mut engine = engine();
        engine.add_pipeline(Some("Everything"), modules![Documents::all()]).unwrap();
        engine.add_pipeline(Some("Later"), modules![text_docs(&["late"])]).unwrap();
        engine.execute().unwrap();
        assert_eq!(
            sources(engine.documents().get("Everything").unwrap()),
            vec!["p1", "p2", "about"]
        );
    }

    #[test]
    fn later_pipeline_reads_empty() {
        let mut engine = Engine::new();
        engine.add_pipeline(Some("Early"), modules![Documents::pipeline("Late")]).unwrap();
        engine.add_pipeline(Some("Late"), modules![text_docs(&["x"])]).unwrap();
        engine.execute().unwrap();
        assert!(engine.documents().get("Early").unwrap().is_empty());
    }

    #[test]
    fn unknown_pipeline_is_an_error() {
        let mut engine = Engine::new();
        engine.add_pipeline(None, modules![Documents::pipeline("Nope")]).unwrap();
        let err = engine.execute().unwrap_err();
        assert!(err.to_string().contains("no pipeline named \"Nope\""));
    }
}
