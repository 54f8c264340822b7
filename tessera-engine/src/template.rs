//! Template assembly: nested wrap composition around a `yield` slot, with
//! embeds and dynamic imports exposed as template functions.

use crate::error::{EngineError, Result};
use crate::resource::{Embed, Resource};
use chrono::format::StrftimeItems;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tera::Tera;
use tessera_core::{Meta, PublishAt};

impl Resource {
    /// Assemble the textual output for this resource.
    ///
    /// The innermost stage evaluates the resource's own body with an empty
    /// `yield`; each render template then wraps the previous output in
    /// order, with its own static imports and its dynamic imports resolved
    /// against this resource.
    pub fn content(self: &Arc<Self>) -> Result<String> {
        let mut output = match self.instance.body() {
            Some(source) => eval(self, self, source, "")?,
            None => String::new(),
        };
        let parent_key = self
            .parent()
            .map(|parent| parent.cache_id().to_string())
            .unwrap_or_default();
        for template in self.templates() {
            let key = (
                parent_key.clone(),
                self.cache_id().to_string(),
                template.cache_id().to_string(),
            );
            if let Some(cached) = self.shared.outputs.get(&key) {
                output = cached.value().clone();
                continue;
            }
            let source = template.instance.body().ok_or_else(|| {
                EngineError::render(template.path_chain(), "template has no body")
            })?;
            output = eval(self, template, source, &output)?;
            self.shared.outputs.insert(key, output.clone());
        }
        Ok(output)
    }
}

/// Evaluate one template body with `context` as the rendering context.
///
/// The function table is the template's embeds, its dynamic imports
/// (resolved against the context manifest), and the reserved helpers.
fn eval(
    context: &Arc<Resource>,
    template: &Arc<Resource>,
    source: &str,
    yielded: &str,
) -> Result<String> {
    let chain = template.path_chain();
    let mut tera = Tera::default();
    tera.add_raw_template("body", source)
        .map_err(|e| EngineError::render(&chain, describe(&e)))?;

    let yielded = yielded.to_string();
    tera.register_function(
        "yield",
        move |_: &HashMap<String, Value>| Ok(Value::String(yielded.clone())),
    );
    tera.register_function("ordinal", ordinal);
    tera.register_function("strftime", strftime);

    for embed in template.embeds() {
        register_embed(&mut tera, embed, context)?;
    }
    for import in &template.manifest.meta.dynamic_imports {
        let Some(name) = import.name.clone() else {
            continue;
        };
        let resolved = import
            .relation()
            .resolve(&context.shared.index, &context.manifest, true)
            .map_err(|e| EngineError::render(&chain, e))?;
        let mut values = Vec::with_capacity(resolved.len());
        for manifest in resolved {
            let resource = context.adopt(manifest)?;
            // No Body here: a dynamic import exists for linking, and
            // rendering it could re-enter the consumer.
            values.push(resource_value(&resource, false)?);
        }
        let list = Value::Array(values);
        tera.register_function(&name, move |_: &HashMap<String, Value>| Ok(list.clone()));
    }

    let rendering_context = render_context(context)?;
    tera.render("body", &rendering_context)
        .map_err(|e| EngineError::render(&chain, describe(&e)))
}

fn register_embed(tera: &mut Tera, embed: &Embed, consumer: &Arc<Resource>) -> Result<()> {
    if embed.wildcard {
        let mut values = Vec::with_capacity(embed.members.len());
        for member in &embed.members {
            values.push(resource_value(member, true)?);
        }
        let list = Value::Array(values);
        tera.register_function(&embed.name, move |_: &HashMap<String, Value>| {
            Ok(list.clone())
        });
        return Ok(());
    }
    let Some(member) = embed.members.first().cloned() else {
        let missing = embed.name.clone();
        tera.register_function(&embed.name, move |_: &HashMap<String, Value>| {
            Err(tera::Error::msg(format!("{missing} not found")))
        });
        return Ok(());
    };
    if member.instance().is_template() {
        // A single embedded template renders on demand with the consumer as
        // context.
        let consumer = consumer.clone();
        tera.register_function(&embed.name, move |_: &HashMap<String, Value>| {
            let source = member
                .instance()
                .body()
                .ok_or_else(|| tera::Error::msg("template has no body"))?;
            eval(&consumer, &member, source, "")
                .map(Value::String)
                .map_err(|e| tera::Error::msg(e.to_string()))
        });
    } else {
        let value = resource_value(&member, true)?;
        tera.register_function(&embed.name, move |_: &HashMap<String, Value>| {
            Ok(value.clone())
        });
    }
    Ok(())
}

/// The view of a resource handed to templates.
fn resource_value(resource: &Arc<Resource>, with_body: bool) -> Result<Value> {
    let mut map = serde_json::Map::new();
    map.insert("Spec".to_string(), resource.manifest().spec.clone());
    map.insert("Titles".to_string(), json!(resource.titles()));
    map.insert("Href".to_string(), json!(resource.href().ok()));
    map.insert(
        "HrefCanonical".to_string(),
        json!(resource.href_canonical().ok()),
    );
    map.insert("Meta".to_string(), meta_value(&resource.manifest().meta));
    if with_body && resource.instance().body().is_some() {
        map.insert("Body".to_string(), json!(resource.content()?));
    }
    Ok(Value::Object(map))
}

fn meta_value(meta: &Meta) -> Value {
    json!({
        "live": meta.live,
        "publishAt": meta.publish_at,
        "href": meta.href,
        "hrefPrefix": meta.href_prefix,
        "title": meta.title,
        "titleBase": meta.title_base,
        "file": meta.file,
    })
}

fn render_context(resource: &Arc<Resource>) -> Result<tera::Context> {
    let mut context = tera::Context::new();
    context.insert("Spec", &resource.manifest().spec);
    context.insert("Titles", &resource.titles());
    context.insert("Href", &resource.href().ok());
    context.insert("HrefCanonical", &resource.href_canonical().ok());
    context.insert("Meta", &meta_value(&resource.manifest().meta));
    let prev = match resource.prev()? {
        Some(neighbor) => Some(resource_value(&neighbor, false)?),
        None => None,
    };
    let next = match resource.next()? {
        Some(neighbor) => Some(resource_value(&neighbor, false)?),
        None => None,
    };
    context.insert("Prev", &prev);
    context.insert("Next", &next);
    Ok(context)
}

fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn ordinal(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let n = args
        .get("n")
        .and_then(Value::as_i64)
        .ok_or_else(|| tera::Error::msg("ordinal requires a numeric `n`"))?;
    Ok(Value::String(ordinal_of(n)))
}

fn ordinal_of(n: i64) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, hundreds) if hundreds != 11 => "st",
        (2, hundreds) if hundreds != 12 => "nd",
        (3, hundreds) if hundreds != 13 => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// `strftime(format=..., date=...)` where `date` is a publishAt-shaped
/// object.
fn strftime(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let format = args
        .get("format")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("strftime requires a `format` string"))?;
    let date = args
        .get("date")
        .cloned()
        .ok_or_else(|| tera::Error::msg("strftime requires a `date` object"))?;
    let publish: PublishAt = serde_json::from_value(date)
        .map_err(|e| tera::Error::msg(format!("strftime date: {e}")))?;
    let instant = publish
        .to_datetime()
        .ok_or_else(|| tera::Error::msg("strftime date has no publish time"))?;
    let mut formatted = String::new();
    write!(
        formatted,
        "{}",
        instant.format_with_items(StrftimeItems::new(format))
    )
    .map_err(|_| tera::Error::msg(format!("invalid strftime format {format:?}")))?;
    Ok(Value::String(formatted))
}
