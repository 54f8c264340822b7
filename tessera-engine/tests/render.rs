//! End-to-end render scenarios against a scratch filesystem.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{expand_generated, Index, Manifest, Selector};
use tessera_engine::{default_factory, EngineError, RenderOptions, Resource};
use tokio_util::sync::CancellationToken;

fn options(root: &Path) -> RenderOptions {
    RenderOptions {
        source_dir: root.join("assets"),
        dest_dir: root.join("dist"),
        cache_dir: root.join(".cache"),
    }
}

fn build(
    manifests: &[serde_json::Value],
    target: &str,
    options: &RenderOptions,
) -> Arc<Resource> {
    let parsed: Vec<Manifest> = manifests
        .iter()
        .enumerate()
        .map(|(n, raw)| {
            Manifest::from_slice(raw.to_string().as_bytes(), &format!("fixture-{n}.json"))
                .unwrap()
        })
        .collect();
    let expanded = expand_generated(parsed).unwrap();
    let mut index = Index::new();
    index.insert(expanded).unwrap();
    index.collate().unwrap();
    Resource::build(
        &Selector::parse(target).unwrap(),
        Arc::new(index),
        Arc::new(default_factory()),
        options,
    )
    .unwrap()
}

async fn render(root: &Arc<Resource>) {
    root.render(4, CancellationToken::new()).await.unwrap();
}

fn read(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path.as_ref())
        .unwrap_or_else(|e| panic!("{}: {e}", path.as_ref().display()))
}

fn domain(extra_meta: serde_json::Value, body: &str) -> serde_json::Value {
    let mut meta = serde_json::json!({"live": true});
    meta.as_object_mut()
        .unwrap()
        .extend(extra_meta.as_object().unwrap().clone());
    serde_json::json!({
        "kind": "website", "group": "domain", "version": "v1",
        "namespace": "site", "name": "main",
        "meta": meta,
        "spec": {
            "title": "Main",
            "description": "A site",
            "author": "someone",
            "body": body,
        },
    })
}

fn post(name: &str, year: i32, body: &str) -> serde_json::Value {
    serde_json::json!({
        "kind": "website", "group": "page", "version": "v1",
        "namespace": "post", "name": name,
        "meta": {
            "live": true,
            "publishAt": {"year": year, "month": 6, "day": 20},
        },
        "spec": {
            "title": format!("Post {name}"),
            "href": format!("/{name}.html"),
            "body": body,
        },
    })
}

const YEAR_TEMPLATE: &str = r#"{
    "kind": "website", "group": "page", "version": "v1",
    "namespace": "year", "name": "{{ count }}",
    "meta": {
        "live": true,
        "publishAt": {"year": {{ count }}, "month": 1, "day": 1}
    },
    "spec": {
        "title": "{{ count }}",
        "href": "/{{ count }}/index.html",
        "body": "{{ count }}"
    }
}"#;

#[tokio::test]
async fn date_roll_out_renders_one_file_per_year() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let mut site = domain(
        serde_json::json!({
            "renderAsChild": [{"selector": "website/page/v1/year/*"}],
        }),
        "home",
    );
    site.as_object_mut().unwrap().insert(
        "generateManifests".to_string(),
        serde_json::json!([{
            "name": "years",
            "rangeOver": [2007, 2020],
            "template": YEAR_TEMPLATE,
        }]),
    );
    let root = build(&[site], "website/domain/v1/site/main", &options);
    render(&root).await;
    for year in 2007..=2020 {
        let path = options.dest_dir.join(format!("{year}/index.html"));
        assert_eq!(read(&path), year.to_string(), "{year}");
    }
    assert_eq!(read(options.dest_dir.join("index.html")), "home");
}

#[tokio::test]
async fn topic_scoping_prefixes_child_output() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        domain(
            serde_json::json!({
                "renderAsChild": [{"selector": "website/taxonomy/v1/topic/testing"}],
            }),
            "home",
        ),
        serde_json::json!({
            "kind": "website", "group": "taxonomy", "version": "v1",
            "namespace": "topic", "name": "testing",
            "meta": {
                "live": true,
                "hrefPrefix": "/topic/testing",
                "renderAsChild": [{"selector": "website/page/v1/post/scoped"}],
            },
            "spec": {"title": "Testing", "href": "/index.html", "body": "topic"},
        }),
        post("scoped", 2012, "scoped body"),
    ];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    render(&root).await;
    assert_eq!(
        read(options.dest_dir.join("topic/testing/scoped.html")),
        "scoped body"
    );
    let topic = root.children()[0].clone();
    let child = topic.children()[0].clone();
    assert_eq!(child.href_canonical().unwrap(), "/scoped.html");
}

#[tokio::test]
async fn wildcard_embed_lists_posts_newest_first() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        domain(
            serde_json::json!({
                "embed": {"pages": {"selector": "website/page/v1/post/*"}},
            }),
            "{% for p in pages() %}[{{ p.Body }}]{% endfor %}",
        ),
        post("oldest", 2010, "b-2010"),
        post("middle", 2011, "b-2011"),
        post("newest", 2012, "b-2012"),
    ];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    render(&root).await;
    assert_eq!(
        read(options.dest_dir.join("index.html")),
        "[b-2012][b-2011][b-2010]"
    );
}

#[tokio::test]
async fn yield_wraps_templates_in_declaration_order() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        serde_json::json!({
            "kind": "html", "group": "template", "version": "v1",
            "namespace": "default", "name": "inner-wrap",
            "meta": {"live": true},
            "spec": {"body": "<a>{{ yield() }}</a>"},
        }),
        serde_json::json!({
            "kind": "html", "group": "template", "version": "v1",
            "namespace": "default", "name": "outer-wrap",
            "meta": {"live": true},
            "spec": {"body": "<b>{{ yield() }}</b>"},
        }),
        serde_json::json!({
            "kind": "website", "group": "page", "version": "v1",
            "namespace": "post", "name": "wrapped",
            "meta": {
                "live": true,
                "renderTemplates": [
                    "html/template/v1/default/inner-wrap",
                    "html/template/v1/default/outer-wrap",
                ],
            },
            "spec": {"title": "Wrapped", "href": "/wrapped.html", "body": "inner"},
        }),
    ];
    let root = build(&manifests, "website/page/v1/post/wrapped", &options);
    render(&root).await;
    assert_eq!(
        read(options.dest_dir.join("wrapped.html")),
        "<b><a>inner</a></b>"
    );
}

#[tokio::test]
async fn single_template_embed_renders_with_consumer_context() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        serde_json::json!({
            "kind": "html", "group": "template", "version": "v1",
            "namespace": "partial", "name": "banner",
            "meta": {"live": true},
            "spec": {"body": "<b>{{ Titles }}</b>"},
        }),
        serde_json::json!({
            "kind": "website", "group": "page", "version": "v1",
            "namespace": "post", "name": "greeter",
            "meta": {
                "live": true,
                "embed": {"banner": {"selector": "html/template/v1/partial/banner"}},
            },
            "spec": {"title": "Greeter", "href": "/greeter.html", "body": "{{ banner() }}!"},
        }),
    ];
    let root = build(&manifests, "website/page/v1/post/greeter", &options);
    render(&root).await;
    assert_eq!(
        read(options.dest_dir.join("greeter.html")),
        "<b>Greeter</b>!"
    );
}

#[tokio::test]
async fn dynamic_imports_resolve_per_consumer() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        serde_json::json!({
            "kind": "html", "group": "template", "version": "v1",
            "namespace": "default", "name": "with-related",
            "meta": {
                "live": true,
                "dynamicImports": [{
                    "name": "related",
                    "selector": "website/page/v1/post/other",
                }],
            },
            "spec": {"body": "{{ yield() }}{% for r in related() %}<{{ r.Spec.title }}>{% endfor %}"},
        }),
        serde_json::json!({
            "kind": "website", "group": "page", "version": "v1",
            "namespace": "post", "name": "anchor",
            "meta": {
                "live": true,
                "publishAt": {"year": 2012, "month": 6, "day": 20},
                "relations": [{"selector": "website/page/v1/post/other"}],
                "renderTemplates": ["html/template/v1/default/with-related"],
            },
            "spec": {"title": "Anchor", "href": "/anchor.html", "body": "body"},
        }),
        post("other", 2010, "other body"),
    ];
    let root = build(&manifests, "website/page/v1/post/anchor", &options);
    render(&root).await;
    assert_eq!(
        read(options.dest_dir.join("anchor.html")),
        "body<Post other>"
    );
}

#[tokio::test]
async fn config_data_embed_exposes_spec_values() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        serde_json::json!({
            "kind": "config", "group": "data", "version": "v1",
            "namespace": "site", "name": "settings",
            "meta": {"live": true},
            "spec": {"tagline": "made of small tiles"},
        }),
        domain(
            serde_json::json!({
                "embed": {"settings": {"selector": "config/data/v1/site/settings"}},
            }),
            "{% set cfg = settings() %}{{ cfg.Spec.tagline }}",
        ),
    ];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    render(&root).await;
    assert_eq!(
        read(options.dest_dir.join("index.html")),
        "made of small tiles"
    );
}

fn fixture_jpeg(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut image = image::RgbImage::new(64, 48);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        *pixel = image::Rgb([(x * 4) as u8, (y * 5) as u8, 128]);
    }
    image::DynamicImage::ImageRgb8(image).save(path).unwrap();
}

fn jpeg_manifest() -> serde_json::Value {
    serde_json::json!({
        "kind": "asset", "group": "jpeg", "version": "v1",
        "namespace": "photo", "name": "sample",
        "meta": {
            "live": true,
            "file": "sample.jpg",
            "hrefPrefix": "/img/sample",
        },
        "spec": {"title": "Sample", "widths": [100, 200, 300]},
    })
}

#[tokio::test]
async fn jpeg_asset_renders_every_width_then_skips() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    fixture_jpeg(&options.source_dir.join("sample.jpg"));
    let manifests = vec![
        domain(
            serde_json::json!({
                "embed": {"hero": {"selector": "asset/jpeg/v1/photo/sample"}},
            }),
            "home",
        ),
        jpeg_manifest(),
    ];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    render(&root).await;

    let mut stamps = Vec::new();
    for width in [100, 200, 300] {
        let path = options.dest_dir.join(format!("img/sample/{width}"));
        let meta = std::fs::metadata(&path)
            .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        assert!(meta.len() > 0);
        stamps.push(meta.modified().unwrap());
    }
    let decoded = image::ImageReader::open(options.dest_dir.join("img/sample/100"))
        .unwrap()
        .with_guessed_format()
        .unwrap()
        .into_dimensions()
        .unwrap();
    assert_eq!(decoded, (100, 75));

    // A second render with unchanged inputs skips every decode and encode.
    let again = build(&manifests, "website/domain/v1/site/main", &options);
    render(&again).await;
    for (width, stamp) in [100, 200, 300].iter().zip(&stamps) {
        let path = options.dest_dir.join(format!("img/sample/{width}"));
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), *stamp);
    }
}

#[tokio::test]
async fn second_render_performs_zero_writes() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        domain(
            serde_json::json!({
                "renderAsChild": [{"selector": "website/page/v1/post/*"}],
            }),
            "home",
        ),
        post("one", 2010, "first"),
        post("two", 2011, "second"),
    ];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    render(&root).await;
    let stamp = |name: &str| {
        std::fs::metadata(options.dest_dir.join(name))
            .unwrap()
            .modified()
            .unwrap()
    };
    let before = [stamp("index.html"), stamp("one.html"), stamp("two.html")];

    let again = build(&manifests, "website/domain/v1/site/main", &options);
    render(&again).await;
    let after = [stamp("index.html"), stamp("one.html"), stamp("two.html")];
    assert_eq!(before, after);
}

#[tokio::test]
async fn identical_runs_produce_identical_trees() {
    let manifests = vec![
        domain(
            serde_json::json!({
                "renderAsChild": [{"selector": "website/page/v1/post/*"}],
            }),
            "home",
        ),
        post("one", 2010, "first"),
        post("two", 2011, "second"),
    ];
    let scratch_a = tempfile::tempdir().unwrap();
    let scratch_b = tempfile::tempdir().unwrap();
    let options_a = options(scratch_a.path());
    let options_b = options(scratch_b.path());
    render(&build(&manifests, "website/domain/v1/site/main", &options_a)).await;
    render(&build(&manifests, "website/domain/v1/site/main", &options_b)).await;
    for name in ["index.html", "one.html", "two.html"] {
        assert_eq!(
            read(options_a.dest_dir.join(name)),
            read(options_b.dest_dir.join(name)),
            "{name}"
        );
    }
}

#[tokio::test]
async fn restore_from_cache_without_rerender() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![domain(serde_json::json!({}), "home")];
    render(&build(&manifests, "website/domain/v1/site/main", &options)).await;
    let out = options.dest_dir.join("index.html");
    std::fs::remove_file(&out).unwrap();

    render(&build(&manifests, "website/domain/v1/site/main", &options)).await;
    assert_eq!(read(&out), "home");
}

#[tokio::test]
async fn cancellation_leaves_no_partial_output() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![domain(serde_json::json!({}), "home")];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = root.render(4, cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(!options.dest_dir.join("index.html").exists());
}

#[tokio::test]
async fn cyclic_children_render_each_node_once() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![serde_json::json!({
        "kind": "website", "group": "taxonomy", "version": "v1",
        "namespace": "topic", "name": "loop",
        "meta": {
            "live": true,
            "renderAsChild": [{"selector": "website/taxonomy/v1/topic/loop"}],
        },
        "spec": {"title": "Loop", "href": "/loop.html", "body": "looped"},
    })];
    let root = build(&manifests, "website/taxonomy/v1/topic/loop", &options);
    tokio::time::timeout(Duration::from_secs(10), render(&root))
        .await
        .expect("cyclic render must terminate");
    assert_eq!(read(options.dest_dir.join("loop.html")), "looped");
}

#[tokio::test]
async fn render_failure_names_the_resource_chain() {
    let scratch = tempfile::tempdir().unwrap();
    let options = options(scratch.path());
    let manifests = vec![
        domain(
            serde_json::json!({
                "renderAsChild": [{"selector": "website/page/v1/post/broken"}],
            }),
            "home",
        ),
        serde_json::json!({
            "kind": "website", "group": "page", "version": "v1",
            "namespace": "post", "name": "broken",
            "meta": {"live": true},
            "spec": {
                "title": "Broken",
                "href": "/broken.html",
                "body": "{{ missing_function() }}",
            },
        }),
    ];
    let root = build(&manifests, "website/domain/v1/site/main", &options);
    let err = root.render(4, CancellationToken::new()).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("broken"), "{message}");
}
