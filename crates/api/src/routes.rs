use lambda_models::{Function, HttpTrigger};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    /// `{name+}`: one or more trailing segments.
    Greedy(String),
}

/// A trigger path such as `/items/{id}` or `/files/{proxy+}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Self {
        let segments = split(path)
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    Some(name) => match name.strip_suffix('+') {
                        Some(greedy) => Segment::Greedy(greedy.to_string()),
                        None => Segment::Param(name.to_string()),
                    },
                    None => Segment::Static(segment.to_string()),
                }
            })
            .collect();
        Self { segments }
    }

    /// Path parameters when `path` matches.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split(path).collect();
        let mut params = HashMap::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Static(expected) => {
                    if parts.get(index) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    params.insert(name.clone(), value.to_string());
                }
                Segment::Greedy(name) => {
                    if index >= parts.len() {
                        return None;
                    }
                    params.insert(name.clone(), parts[index..].join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Sort key: static routes, then parameterized, then greedy; longer
    /// (more specific) paths before shorter ones within each group.
    fn precedence(&self) -> (bool, usize, Reverse<usize>) {
        let greedy = self
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Greedy(_)));
        let params = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count();
        (greedy, params, Reverse(self.segments.len()))
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[derive(Debug, Clone)]
pub struct MountedRoute {
    pub trigger: HttpTrigger,
    pub pattern: PathPattern,
    pub function: Arc<Function>,
}

#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a MountedRoute,
    pub path_parameters: HashMap<String, String>,
}

/// Function routes in matching order. Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<MountedRoute>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<MountedRoute>) -> Self {
        routes.sort_by_key(|route| (route.pattern.precedence(), route.trigger.method.is_none()));
        Self { routes }
    }

    pub fn routes(&self) -> &[MountedRoute] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            let method_matches = route
                .trigger
                .method
                .as_deref()
                .map_or(true, |m| m.eq_ignore_ascii_case(method));
            if !method_matches {
                return None;
            }
            route.pattern.matches(path).map(|path_parameters| RouteMatch {
                route,
                path_parameters,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn route(function: &str, method: Option<&str>, path: &str) -> MountedRoute {
        MountedRoute {
            trigger: HttpTrigger {
                event_id: "E".into(),
                function: function.into(),
                path: path.into(),
                method: method.map(str::to_string),
                stage: "Prod".into(),
            },
            pattern: PathPattern::parse(path),
            function: Arc::new(Function {
                logical_id: function.into(),
                function_name: function.into(),
                arn: String::new(),
                runtime: "python3.8".into(),
                handler: "app.handler".into(),
                code_uri: PathBuf::from("."),
                memory_size: 128,
                timeout: 3,
                environment: BTreeMap::new(),
                http_triggers: vec![],
            }),
        }
    }

    #[test]
    fn static_beats_param_beats_greedy() {
        let table = RouteTable::new(vec![
            route("Greedy", None, "/items/{proxy+}"),
            route("Param", Some("GET"), "/items/{id}"),
            route("Static", Some("GET"), "/items/special"),
        ]);

        let hit = table.resolve("GET", "/items/special").unwrap();
        assert_eq!(hit.route.trigger.function, "Static");

        let hit = table.resolve("GET", "/items/42").unwrap();
        assert_eq!(hit.route.trigger.function, "Param");
        assert_eq!(hit.path_parameters["id"], "42");

        let hit = table.resolve("GET", "/items/a/b").unwrap();
        assert_eq!(hit.route.trigger.function, "Greedy");
        assert_eq!(hit.path_parameters["proxy"], "a/b");

        let hit = table.resolve("POST", "/items/42").unwrap();
        assert_eq!(hit.route.trigger.function, "Greedy");
    }

    #[test]
    fn greedy_needs_at_least_one_segment() {
        let pattern = PathPattern::parse("/files/{proxy+}");
        assert!(pattern.matches("/files").is_none());
        assert!(pattern.matches("/files/x").is_some());
    }

    #[test]
    fn root_and_trailing_slashes() {
        let table = RouteTable::new(vec![route("Root", Some("GET"), "/")]);
        assert!(table.resolve("GET", "/").is_some());
        assert!(table.resolve("GET", "/x").is_none());
        assert!(PathPattern::parse("/a/b").matches("/a/b/").is_some());
    }
}
