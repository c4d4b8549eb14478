// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Microformats2 parsing.
//!
//! Covers the parts of mf2 that mention classification relies on: root
//! `h-*` items, `p-`, `u-`, `dt-` and `e-` properties, nested items and the
//! implied `name`. Value-class parsing and implied `photo`/`url` are not
//! implemented.

use crate::document::resolve_url;
use scraper::{ElementRef, Html};
use std::collections::BTreeMap;
use url::Url;

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    /// `e-*` property: the inner markup and its plain text.
    Embedded { html: String, value: String },
    Item(Item),
}

impl PropertyValue {
    /// Plain text form of the value, when it has one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            PropertyValue::Embedded { value, .. } => Some(value),
            PropertyValue::Item(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            PropertyValue::Item(item) => Some(item),
            _ => None,
        }
    }
}

/// A parsed `h-*` item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub types: Vec<String>,
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    pub children: Vec<Item>,
}

impl Item {
    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }

    pub fn first(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).and_then(|values| values.first())
    }

    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(PropertyValue::as_text)
    }

    /// This item if it has type `ty`, otherwise the first matching descendant
    /// among its children.
    pub fn find(&self, ty: &str) -> Option<&Item> {
        if self.has_type(ty) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(ty))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    P,
    U,
    Dt,
    E,
}

/// Parse every top-level item in `body`. Relative `u-*` values resolve
/// against `base`.
pub fn parse(body: &str, base: Option<&Url>) -> Vec<Item> {
    let html = Html::parse_document(body);
    let mut items = Vec::new();
    find_roots(html.root_element(), base, &mut items);
    items
}

fn find_roots(el: ElementRef<'_>, base: Option<&Url>, out: &mut Vec<Item>) {
    if !root_types(el).is_empty() {
        out.push(parse_item(el, base));
        return;
    }
    for child in el.children().filter_map(ElementRef::wrap) {
        find_roots(child, base, out);
    }
}

fn parse_item(el: ElementRef<'_>, base: Option<&Url>) -> Item {
    let mut item = Item {
        types: root_types(el),
        ..Item::default()
    };
    let mut explicit_text = false;
    collect_properties(el, base, &mut item, &mut explicit_text);

    let has_nested = !item.children.is_empty()
        || item
            .properties
            .values()
            .flatten()
            .any(|v| matches!(v, PropertyValue::Item(_)));
    if !item.properties.contains_key("name") && !explicit_text && !has_nested {
        item.properties
            .insert("name".into(), vec![PropertyValue::Text(implied_name(el))]);
    }
    item
}

fn collect_properties(
    el: ElementRef<'_>,
    base: Option<&Url>,
    item: &mut Item,
    explicit_text: &mut bool,
) {
    for child in el.children().filter_map(ElementRef::wrap) {
        let props = property_classes(child);
        if props.iter().any(|(p, _)| matches!(p, Prefix::P | Prefix::E)) {
            *explicit_text = true;
        }

        if !root_types(child).is_empty() {
            let nested = parse_item(child, base);
            if props.is_empty() {
                item.children.push(nested);
            } else {
                for (_, name) in props {
                    push(item, name, PropertyValue::Item(nested.clone()));
                }
            }
            continue;
        }

        for (prefix, name) in props {
            let value = match prefix {
                Prefix::P => PropertyValue::Text(p_value(child)),
                Prefix::U => PropertyValue::Text(u_value(child, base)),
                Prefix::Dt => PropertyValue::Text(dt_value(child)),
                Prefix::E => PropertyValue::Embedded {
                    html: child.inner_html().trim().to_string(),
                    value: text_of(child),
                },
            };
            push(item, name, value);
        }
        collect_properties(child, base, item, explicit_text);
    }
}

fn push(item: &mut Item, name: String, value: PropertyValue) {
    item.properties.entry(name).or_default().push(value);
}

fn root_types(el: ElementRef<'_>) -> Vec<String> {
    el.value()
        .classes()
        .filter(|c| c.strip_prefix("h-").is_some_and(is_mf_name))
        .map(str::to_string)
        .collect()
}

fn property_classes(el: ElementRef<'_>) -> Vec<(Prefix, String)> {
    el.value()
        .classes()
        .filter_map(|class| {
            let (prefix, name) = if let Some(name) = class.strip_prefix("p-") {
                (Prefix::P, name)
            } else if let Some(name) = class.strip_prefix("u-") {
                (Prefix::U, name)
            } else if let Some(name) = class.strip_prefix("dt-") {
                (Prefix::Dt, name)
            } else if let Some(name) = class.strip_prefix("e-") {
                (Prefix::E, name)
            } else {
                return None;
            };
            is_mf_name(name).then(|| (prefix, name.to_string()))
        })
        .collect()
}

fn is_mf_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn attr(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value().attr(name).map(str::to_string)
}

fn p_value(el: ElementRef<'_>) -> String {
    let from_attr = match el.value().name() {
        "data" | "input" => attr(el, "value"),
        "abbr" | "link" => attr(el, "title"),
        "img" | "area" => attr(el, "alt"),
        _ => None,
    };
    from_attr.unwrap_or_else(|| text_of(el))
}

fn u_value(el: ElementRef<'_>, base: Option<&Url>) -> String {
    let raw = match el.value().name() {
        "a" | "area" | "link" => attr(el, "href"),
        "img" | "audio" | "video" | "source" | "iframe" => attr(el, "src"),
        "object" => attr(el, "data"),
        _ => None,
    };
    match raw {
        Some(href) => resolve_url(base, &href).unwrap_or(href),
        None => p_value(el),
    }
}

fn dt_value(el: ElementRef<'_>) -> String {
    let from_attr = match el.value().name() {
        "time" | "ins" | "del" => attr(el, "datetime"),
        _ => None,
    };
    from_attr.unwrap_or_else(|| p_value(el))
}

fn implied_name(el: ElementRef<'_>) -> String {
    let from_attr = match el.value().name() {
        "img" | "area" => attr(el, "alt"),
        "abbr" => attr(el, "title"),
        _ => None,
    };
    from_attr.unwrap_or_else(|| text_of(el))
}
