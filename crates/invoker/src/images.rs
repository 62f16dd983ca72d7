use lambda_models::LocalError;
use std::collections::HashMap;

const IMAGE_REPOSITORY: &str = "lambci/lambda";

const SUPPORTED_RUNTIMES: &[&str] = &[
    "nodejs4.3",
    "nodejs6.10",
    "nodejs8.10",
    "nodejs10.x",
    "nodejs12.x",
    "python2.7",
    "python3.6",
    "python3.7",
    "python3.8",
    "ruby2.5",
    "ruby2.7",
    "java8",
    "java11",
    "go1.x",
    "dotnetcore2.0",
    "dotnetcore2.1",
    "dotnetcore3.1",
    "provided",
];

/// Runtime id -> sandbox image. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeImages {
    images: HashMap<String, String>,
}

impl RuntimeImages {
    pub fn new() -> Self {
        Self {
            images: SUPPORTED_RUNTIMES
                .iter()
                .map(|runtime| (runtime.to_string(), format!("{IMAGE_REPOSITORY}:{runtime}")))
                .collect(),
        }
    }

    /// Replaces or adds entries, e.g. from the `[runtimes]` config table.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (runtime, image) in overrides {
            self.images.insert(runtime.clone(), image.clone());
        }
        self
    }

    pub fn image_for(&self, function: &str, runtime: &str) -> Result<&str, LocalError> {
        self.images
            .get(runtime)
            .map(String::as_str)
            .ok_or_else(|| LocalError::RuntimeNotSupported {
                function: function.to_string(),
                runtime: runtime.to_string(),
            })
    }

    pub fn supports(&self, runtime: &str) -> bool {
        self.images.contains_key(runtime)
    }
}

impl Default for RuntimeImages {
    fn default() -> Self {
        Self::new()
    }
}

/// Entrypoint that starts the runtime under its debugger, listening on `port`.
///
/// `None` for runtimes that have no debugger harness; those run unchanged.
pub fn debug_entrypoint(runtime: &str, port: u16) -> Option<Vec<String>> {
    let args: Vec<String> = match runtime {
        "nodejs4.3" => vec![
            "/usr/local/lib64/node-v4.3.x/bin/node".into(),
            format!("--debug-brk={port}"),
            "--nolazy".into(),
            "--max-old-space-size=1229".into(),
            "--max-new-space-size=153".into(),
            "--max-executable-size=153".into(),
            "--expose-gc".into(),
            "/var/runtime/node_modules/awslambda/bin/awslambda".into(),
        ],
        "nodejs6.10" | "nodejs8.10" | "nodejs10.x" | "nodejs12.x" => vec![
            "/var/lang/bin/node".into(),
            format!("--inspect-brk=0.0.0.0:{port}"),
            "--nolazy".into(),
            "--expose-gc".into(),
            "--max-semi-space-size=150".into(),
            "--max-old-space-size=2707".into(),
            "/var/runtime/node_modules/awslambda/index.js".into(),
        ],
        "python2.7" | "python3.6" | "python3.7" | "python3.8" => {
            let interpreter = if runtime == "python2.7" {
                "/usr/bin/python2.7".to_string()
            } else {
                format!("/var/lang/bin/{runtime}")
            };
            vec![
                interpreter,
                "-m".into(),
                "ptvsd".into(),
                "--host".into(),
                "0.0.0.0".into(),
                "--port".into(),
                port.to_string(),
                "--wait".into(),
                "/var/runtime/awslambda/bootstrap.py".into(),
            ]
        }
        "java8" => vec![
            "/usr/bin/java".into(),
            format!("-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,quiet=y,address={port}"),
            "-XX:MaxHeapSize=2834432k".into(),
            "-XX:+UseSerialGC".into(),
            "-Djava.net.preferIPv4Stack=true".into(),
            "-jar".into(),
            "/var/runtime/lib/LambdaJavaRTEntry-1.0.jar".into(),
        ],
        "go1.x" => vec![
            "/var/runtime/aws-lambda-go".into(),
            "-debug=true".into(),
            format!("-delvePort={port}"),
            "-delvePath=/tmp/lambci_debug_files/dlv".into(),
        ],
        _ => return None,
    };
    Some(args)
}
