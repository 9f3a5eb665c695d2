//! Intent → Cisco IOS configuration text.
//!
//! Rendering is pure: the same intent always produces byte-identical text,
//! and every value is checked before it reaches a template so bad intent is
//! caught before any device is contacted.

use serde::Serialize;
use std::path::Path;
use tera::{Context, Tera};

use crate::error::RenderError;
use crate::models::{Intent, StageKind};
use crate::utils::{mask_to_prefix, parse_ipv4};

const INTERFACES_TEMPLATE: &str = "interfaces.tera";
const BGP_TEMPLATE: &str = "bgp.tera";

const BUILTIN_INTERFACES: &str = include_str!("templates/interfaces.tera");
const BUILTIN_BGP: &str = include_str!("templates/bgp.tera");

/// Rendered configuration, one block per stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub interfaces: String,
    pub bgp: String,
}

impl RenderedConfig {
    pub fn for_stage(&self, stage: StageKind) -> &str {
        match stage {
            StageKind::L3 => &self.interfaces,
            StageKind::Bgp => &self.bgp,
        }
    }
}

#[derive(Serialize)]
struct InterfaceView<'a> {
    name: &'a str,
    description: &'a str,
    address: &'a str,
    mask: &'a str,
    enabled: bool,
}

/// ConfigRenderer holds the compiled stage templates
pub struct ConfigRenderer {
    tera: Tera,
}

impl ConfigRenderer {
    /// Renderer using the templates compiled into the binary
    pub fn builtin() -> Result<Self, RenderError> {
        Self::with_templates(BUILTIN_INTERFACES, BUILTIN_BGP)
    }

    /// Renderer preferring `interfaces.tera` / `bgp.tera` from `dir`,
    /// falling back to the built-in template for any file that is absent
    pub fn from_dir(dir: &Path) -> Result<Self, RenderError> {
        let load = |name: &str, fallback: &str| -> Result<String, RenderError> {
            let path = dir.join(name);
            if path.is_file() {
                tracing::info!("Using template override {}", path.display());
                std::fs::read_to_string(&path)
                    .map_err(|e| RenderError::Template(format!("{}: {}", path.display(), e)))
            } else {
                Ok(fallback.to_string())
            }
        };
        let interfaces = load(INTERFACES_TEMPLATE, BUILTIN_INTERFACES)?;
        let bgp = load(BGP_TEMPLATE, BUILTIN_BGP)?;
        Self::with_templates(&interfaces, &bgp)
    }

    fn with_templates(interfaces: &str, bgp: &str) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_template(INTERFACES_TEMPLATE, interfaces)
            .map_err(|e| RenderError::Template(format!("invalid interfaces template: {}", e)))?;
        tera.add_raw_template(BGP_TEMPLATE, bgp)
            .map_err(|e| RenderError::Template(format!("invalid bgp template: {}", e)))?;
        Ok(Self { tera })
    }

    /// Render both stage blocks for `intent`
    pub fn render(&self, intent: &Intent) -> Result<RenderedConfig, RenderError> {
        Ok(RenderedConfig {
            interfaces: self.render_interfaces(intent)?,
            bgp: self.render_bgp(intent)?,
        })
    }

    fn render_interfaces(&self, intent: &Intent) -> Result<String, RenderError> {
        let mut views = Vec::with_capacity(intent.interfaces.len());
        for (name, intf) in &intent.interfaces {
            check_cli_token(&format!("interface {:?}", name), name)?;
            check_single_line(&format!("interface {} description", name), &intf.description)?;

            let (address, mask) = intf.address_and_mask().ok_or_else(|| RenderError::MissingMask {
                interface: name.clone(),
                value: intf.ipaddr.clone(),
            })?;
            check_address(&format!("interface {} address", name), address)?;
            check_mask(&format!("interface {} mask", name), mask)?;

            views.push(InterfaceView {
                name,
                description: &intf.description,
                address,
                mask,
                enabled: intf.is_up(),
            });
        }

        let mut context = Context::new();
        context.insert("interfaces", &views);
        self.tera
            .render(INTERFACES_TEMPLATE, &context)
            .map_err(|e| RenderError::Template(format!("interfaces: {}", e)))
    }

    fn render_bgp(&self, intent: &Intent) -> Result<String, RenderError> {
        let bgp = &intent.bgp;
        if bgp.asn == 0 {
            return Err(RenderError::InvalidAsn { field: "bgp.asn".to_string() });
        }
        check_address("bgp.rid", &bgp.rid)?;
        for (i, nb) in bgp.neighbors.iter().enumerate() {
            check_address(&format!("bgp.neighbors[{}].ipaddr", i), &nb.ipaddr)?;
            if nb.remote_asn == 0 {
                return Err(RenderError::InvalidAsn { field: format!("bgp.neighbors[{}].remote_asn", i) });
            }
        }
        for (i, net) in bgp.networks.iter().enumerate() {
            check_address(&format!("bgp.networks[{}].net", i), &net.net)?;
            check_mask(&format!("bgp.networks[{}].mask", i), &net.mask)?;
        }

        let mut context = Context::new();
        context.insert("asn", &bgp.asn);
        context.insert("rid", &bgp.rid);
        context.insert("neighbors", &bgp.neighbors);
        context.insert("networks", &bgp.networks);
        self.tera
            .render(BGP_TEMPLATE, &context)
            .map_err(|e| RenderError::Template(format!("bgp: {}", e)))
    }
}

fn check_address(field: &str, value: &str) -> Result<(), RenderError> {
    match parse_ipv4(value) {
        Some(_) => Ok(()),
        None => Err(RenderError::InvalidAddress { field: field.to_string(), value: value.to_string() }),
    }
}

fn check_mask(field: &str, value: &str) -> Result<(), RenderError> {
    match mask_to_prefix(value) {
        Some(_) => Ok(()),
        None => Err(RenderError::InvalidMask { field: field.to_string(), value: value.to_string() }),
    }
}

fn check_single_line(field: &str, value: &str) -> Result<(), RenderError> {
    if value.contains(['\n', '\r']) {
        return Err(RenderError::UnsafeText { field: field.to_string() });
    }
    Ok(())
}

/// Interface names are spliced into CLI verbatim, so they must be a single token
fn check_cli_token(field: &str, value: &str) -> Result<(), RenderError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(RenderError::UnsafeText { field: field.to_string() });
    }
    Ok(())
}
