use rexo_ssr::{PropValue, Props, RenderRequest, SandboxConfig, SandboxError, ScriptSandbox};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const APP: &str = r#"
import { label } from "./util.js";

SSR.registerComponent("Echo", {
  render: (props) => SSR.h("div", { id: "echo", className: "echo" }, props.marker),
  css: ".echo{color:red}",
  data: (props) => ({ seen: props.marker }),
});
SSR.registerComponent("Labelled", () => SSR.h("span", null, label));
SSR.registerComponent("Broken", () => {
  throw new Error("kaboom");
});
SSR.registerComponent("Spin", () => {
  while (true) {}
});
SSR.registerComponent("Later", async (props) => {
  await null;
  return SSR.h("p", null, "async ", props.n);
});
SSR.registerComponent("Where", () => {
  const ctx = SSR.context();
  return SSR.h("span", null, ctx.path, "?page=", ctx.query.page);
});
SSR.registerComponent("Unsafe", () => SSR.h("b", { title: '"quoted"' }, "<script>"));
SSR.registerComponent("Deep", (props) => {
  let node = "leaf";
  for (let i = 0; i < props.levels; i++) node = SSR.h("i", null, node);
  return node;
});
"#;

const UTIL: &str = r#"export const label = "from util";"#;

fn write_bundle(dir: &Path, files: &[(&str, &str)]) {
    for (name, source) in files {
        std::fs::write(dir.join(name), source).unwrap();
    }
}

fn bundle_config(dir: &Path) -> SandboxConfig {
    SandboxConfig {
        bundle_dir: Some(dir.to_string_lossy().into_owned()),
        timeout_ms: Some(1_500),
        ..Default::default()
    }
}

async fn bundle_sandbox(workers: usize) -> (tempfile::TempDir, ScriptSandbox) {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &[("app.js", APP), ("util.js", UTIL)]);
    let config = SandboxConfig {
        workers,
        ..bundle_config(dir.path())
    };
    let sandbox = ScriptSandbox::start(config).await.unwrap();
    (dir, sandbox)
}

fn props(pairs: &[(&str, PropValue)]) -> Props {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[tokio::test]
async fn builtin_pages_render() {
    let sandbox = ScriptSandbox::start(SandboxConfig::default()).await.unwrap();

    let request = RenderRequest::new("HomePage", "/")
        .with_props(props(&[("description", "served by rust".into())]));
    let result = sandbox.render(request).await.unwrap();

    assert!(result.is_ok());
    assert!(result.html.contains("Welcome to"));
    assert!(result.html.contains("served by rust"));
    assert!(result.html.contains("class=\"min-h-screen bg-white\""));

    sandbox.shutdown().await;
}

#[tokio::test]
async fn bundle_component_with_assets() {
    let (_dir, sandbox) = bundle_sandbox(1).await;

    let request = RenderRequest::new("Echo", "/").with_props(props(&[("marker", "m-1".into())]));
    let result = sandbox.render(request).await.unwrap();

    assert!(result.html.starts_with("<div"));
    assert!(result.html.contains(">m-1</div>"));
    assert!(result.html.contains("class=\"echo\""));
    assert_eq!(result.css, ".echo{color:red}");
    assert_eq!(result.data["seen"].as_str(), Some("m-1"));

    let labelled = sandbox.render(RenderRequest::new("Labelled", "/")).await.unwrap();
    assert_eq!(labelled.html, "<span>from util</span>");
}

#[tokio::test]
async fn unknown_component_is_reported() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let err = sandbox.render(RenderRequest::new("Missing", "/")).await.unwrap_err();
    assert!(matches!(err, SandboxError::ComponentNotFound(name) if name == "Missing"));
}

#[tokio::test]
async fn thrown_error_is_a_render_error() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let err = sandbox.render(RenderRequest::new("Broken", "/")).await.unwrap_err();
    match err {
        SandboxError::Render(message) => assert!(message.contains("kaboom")),
        other => panic!("expected render error, got {other:?}"),
    }

    // The isolate keeps serving after a component throws
    let ok = sandbox.render(RenderRequest::new("Labelled", "/")).await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn async_components_are_awaited() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let request = RenderRequest::new("Later", "/").with_props(props(&[("n", 3i64.into())]));
    let result = sandbox.render(request).await.unwrap();
    assert_eq!(result.html, "<p>async 3</p>");
}

#[tokio::test]
async fn context_is_scoped_to_the_call() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let mut query = BTreeMap::new();
    query.insert("page".to_string(), "2".to_string());

    let result = sandbox
        .render(RenderRequest::new("Where", "/list").with_query(query))
        .await
        .unwrap();
    assert_eq!(result.html, "<span>/list?page=2</span>");
}

#[tokio::test]
async fn output_is_escaped() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let result = sandbox.render(RenderRequest::new("Unsafe", "/")).await.unwrap();
    assert!(result.html.contains("&lt;script&gt;"));
    assert!(result.html.contains("title=\"&quot;quoted&quot;\""));
    assert!(!result.html.contains("<script>"));
}

#[tokio::test]
async fn polluting_props_are_rejected() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let mut nested = Props::new();
    nested.insert("__proto__".into(), PropValue::Bool(true));
    let request = RenderRequest::new("Echo", "/").with_props(props(&[("user", nested.into())]));

    let err = sandbox.render(request).await.unwrap_err();
    assert!(matches!(err, SandboxError::Serialization(_)));
}

#[tokio::test]
async fn tree_depth_is_bounded() {
    let (_dir, sandbox) = bundle_sandbox(1).await;
    let deep = |levels: i64| RenderRequest::new("Deep", "/").with_props(props(&[("levels", levels.into())]));

    let result = sandbox.render(deep(60)).await.unwrap();
    assert!(result.html.starts_with("<i><i>"));
    assert!(result.html.contains(">leaf</i>"));

    match sandbox.render(deep(61)).await.unwrap_err() {
        SandboxError::Render(message) => assert!(message.contains("deeper than 60 levels")),
        other => panic!("expected render error, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_recovers_the_isolate() {
    let (_dir, sandbox) = bundle_sandbox(1).await;

    let started = Instant::now();
    let err = sandbox.render(RenderRequest::new("Spin", "/")).await.unwrap_err();
    assert!(matches!(err, SandboxError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));

    let request = RenderRequest::new("Echo", "/").with_props(props(&[("marker", "after".into())]));
    let result = sandbox.render(request).await.unwrap();
    assert!(result.html.contains(">after</div>"));
}

#[tokio::test]
async fn failed_isolate_rebuild_is_retried() {
    let (dir, sandbox) = bundle_sandbox(1).await;

    // The replacement isolate after the timeout cannot load the bundle
    write_bundle(dir.path(), &[("app.js", "SSR.registerComponent(\"X\", ")]);
    let err = sandbox.render(RenderRequest::new("Spin", "/")).await.unwrap_err();
    assert!(matches!(err, SandboxError::Timeout(_)));

    let err = sandbox.render(RenderRequest::new("Labelled", "/")).await.unwrap_err();
    assert!(matches!(err, SandboxError::Unavailable));

    write_bundle(dir.path(), &[("app.js", APP)]);
    let labelled = sandbox.render(RenderRequest::new("Labelled", "/")).await.unwrap();
    assert_eq!(labelled.html, "<span>from util</span>");
}

#[tokio::test]
async fn concurrent_renders_see_only_their_props() {
    let (_dir, sandbox) = bundle_sandbox(2).await;
    assert_eq!(sandbox.worker_count(), 2);
    let sandbox = Arc::new(sandbox);

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move {
                let marker = format!("marker-{i}");
                let request =
                    RenderRequest::new("Echo", "/").with_props(props(&[("marker", marker.clone().into())]));
                let result = sandbox.render(request).await.unwrap();
                (marker, result)
            })
        })
        .collect();

    for task in tasks {
        let (marker, result) = task.await.unwrap();
        assert!(result.html.contains(&format!(">{marker}</div>")));
        assert_eq!(result.data["seen"].as_str(), Some(marker.as_str()));
    }
}

#[tokio::test]
async fn broken_bundle_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &[("app.js", "SSR.registerComponent(\"X\", ")]);
    let err = ScriptSandbox::start(bundle_config(dir.path())).await.err().unwrap();
    assert!(matches!(err, SandboxError::Startup(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn empty_bundle_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &[("app.js", "export const nothing = 1;")]);
    assert!(ScriptSandbox::start(bundle_config(dir.path())).await.is_err());
}

#[tokio::test]
async fn bundle_cannot_import_remote_code() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(
        dir.path(),
        &[(
            "app.js",
            "import \"https://example.com/evil.js\";\nSSR.registerComponent(\"X\", () => null);",
        )],
    );
    assert!(ScriptSandbox::start(bundle_config(dir.path())).await.is_err());
}
