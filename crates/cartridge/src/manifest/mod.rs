//! Document model for a cartridge manifest (`imsmanifest.xml`).
//!
//! The model owns resources, organizations and their item trees, and the
//! root namespace bindings. It is built once by [`Manifest::parse`], mutated
//! in place by every pass, and written once by [`Manifest::serialize`].
//! `parse(serialize(m))` reproduces `m` for any manifest this crate produced.

mod items;
mod namespace;

use std::collections::BTreeSet;

use crate::error::CartridgeError;
use crate::xml::{self, Attribute, Element, Node};

pub use items::{Item, ItemId, Organization, Parent};
pub use namespace::{NamespaceBinding, NamespaceKind};

pub const MANIFEST_FILE: &str = "imsmanifest.xml";
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaLocation {
    pub namespace: String,
    pub location: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub identifier: String,
    pub resource_type: String,
    pub href: Option<String>,
    /// `file` references in document order.
    pub files: Vec<String>,
    /// Identifiers named by `dependency` edges.
    pub dependencies: Vec<String>,
    /// Attributes other than `identifier`, `type` and `href`.
    pub attributes: Vec<Attribute>,
    pub extensions: Vec<Element>,
    pub namespace: NamespaceKind,
}

impl Resource {
    pub fn new(identifier: &str, resource_type: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            resource_type: resource_type.to_string(),
            href: None,
            files: Vec::new(),
            dependencies: Vec::new(),
            attributes: Vec::new(),
            extensions: Vec::new(),
            namespace: NamespaceKind::Core,
        }
    }

    /// The `href` attribute, or the first `file` reference when there is none.
    pub fn primary_reference(&self) -> Option<&str> {
        self.href
            .as_deref()
            .or_else(|| self.files.first().map(String::as_str))
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.href
            .as_deref()
            .into_iter()
            .chain(self.files.iter().map(String::as_str))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn intended_use(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case("intendeduse"))
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub identifier: Option<String>,
    /// Root attributes other than the identifier, namespace declarations and
    /// `xsi:schemaLocation`.
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceBinding>,
    pub schema_locations: Vec<SchemaLocation>,
    pub metadata: Option<Element>,
    pub organizations_attributes: Vec<Attribute>,
    pub organizations: Vec<Organization>,
    pub resources_attributes: Vec<Attribute>,
    pub resources: Vec<Resource>,
    /// Top-level elements outside metadata, organizations and resources.
    pub extensions: Vec<Element>,
    items: Vec<Item>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        let root = xml::parse(bytes)
            .map_err(|err| CartridgeError::Structural(format!("manifest is unparsable: {err}")))?;
        Self::from_element(&root)
    }

    pub fn serialize(&self) -> String {
        xml::write(&self.to_element())
    }

    pub fn version(&self) -> Option<String> {
        self.metadata
            .as_ref()?
            .find("schemaversion")
            .map(|el| el.text_content().trim().to_string())
    }

    /// Sets the metadata `schemaversion`. Returns false when the manifest has
    /// no version element to update.
    pub fn set_version(&mut self, version: &str) -> bool {
        let Some(metadata) = self.metadata.as_mut() else {
            return false;
        };
        let mut updated = false;
        metadata.walk_mut(&mut |el: &mut Element| {
            if !updated && el.local_name() == "schemaversion" {
                el.set_text(version);
                updated = true;
            }
        });
        updated
    }

    pub fn namespace_uri(&self, prefix: Option<&str>) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|binding| binding.prefix.as_deref() == prefix)
            .map(|binding| binding.uri.as_str())
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|res| res.identifier == id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|res| res.identifier == id)
    }

    pub fn contains_resource(&self, id: &str) -> bool {
        self.resource(id).is_some()
    }

    pub fn resource_ids(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .map(|res| res.identifier.clone())
            .collect()
    }

    pub fn remove_resource(&mut self, id: &str) -> Option<Resource> {
        let index = self.resources.iter().position(|res| res.identifier == id)?;
        Some(self.resources.remove(index))
    }

    /// Identifiers of resources holding a dependency edge onto `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|res| res.dependencies.iter().any(|dep| dep == id))
            .map(|res| res.identifier.as_str())
            .collect()
    }

    fn from_element(root: &Element) -> Result<Self, CartridgeError> {
        if root.local_name() != "manifest" {
            return Err(CartridgeError::Structural(format!(
                "root element is <{}>, expected <manifest>",
                root.name
            )));
        }

        let mut manifest = Manifest {
            identifier: root.attr("identifier").map(str::to_string),
            attributes: Vec::new(),
            namespaces: Vec::new(),
            schema_locations: Vec::new(),
            metadata: None,
            organizations_attributes: Vec::new(),
            organizations: Vec::new(),
            resources_attributes: Vec::new(),
            resources: Vec::new(),
            extensions: Vec::new(),
            items: Vec::new(),
        };

        for attr in &root.attributes {
            if let Some(prefix) = attr.namespace_declaration() {
                manifest
                    .namespaces
                    .push(NamespaceBinding::new(prefix, &attr.value));
            } else if attr.local_name() == "schemaLocation" {
                manifest.schema_locations = parse_schema_locations(&attr.value);
            } else if attr.name != "identifier" {
                manifest.attributes.push(attr.clone());
            }
        }

        // Core elements are written unprefixed, so the default namespace must
        // carry the root's namespace.
        if let (Some(_), Some(uri)) = (root.prefix(), root.namespace.as_deref()) {
            manifest.namespaces.retain(|binding| binding.prefix.is_some());
            manifest.namespaces.insert(0, NamespaceBinding::new(None, uri));
        }

        let mut found_container = false;
        for child in root.elements() {
            match child.local_name() {
                "metadata" if manifest.metadata.is_none() => {
                    manifest.metadata = Some(child.clone());
                }
                "organizations" => {
                    found_container = true;
                    manifest.organizations_attributes = child.attributes.clone();
                    for org in child.elements().filter(|el| el.local_name() == "organization") {
                        manifest.parse_organization(org);
                    }
                }
                "resources" => {
                    found_container = true;
                    manifest.resources_attributes = child.attributes.clone();
                    for el in child.elements() {
                        if el.local_name() == "resource" {
                            let resource = parse_resource(el)?;
                            if manifest.contains_resource(&resource.identifier) {
                                return Err(CartridgeError::Structural(format!(
                                    "duplicate resource identifier {}",
                                    resource.identifier
                                )));
                            }
                            manifest.resources.push(resource);
                        } else {
                            tracing::debug!(element = %el.name, "ignoring non-resource element in <resources>");
                        }
                    }
                }
                _ => manifest.extensions.push(child.clone()),
            }
        }

        if !found_container {
            return Err(CartridgeError::Structural(
                "manifest has neither <organizations> nor <resources>".into(),
            ));
        }
        Ok(manifest)
    }

    fn parse_organization(&mut self, el: &Element) {
        let index = self.organizations.len();
        let (title, extensions) = split_title(el);
        self.organizations.push(Organization {
            identifier: el.attr("identifier").map(str::to_string),
            title,
            attributes: without(&el.attributes, &["identifier"]),
            extensions,
            roots: Vec::new(),
        });
        for child in el.elements().filter(|child| child.local_name() == "item") {
            self.parse_item(child, Parent::Organization(index));
        }
    }

    fn parse_item(&mut self, el: &Element, parent: Parent) {
        let (title, extensions) = split_title(el);
        let id = self.push_item(Item {
            identifier: el.attr("identifier").map(str::to_string),
            identifierref: el.attr("identifierref").map(str::to_string),
            title,
            attributes: without(&el.attributes, &["identifier", "identifierref"]),
            extensions,
            namespace: el.kind,
            parent,
            children: Vec::new(),
            detached: false,
        });
        for child in el.elements().filter(|child| child.local_name() == "item") {
            self.parse_item(child, Parent::Item(id));
        }
    }

    fn to_element(&self) -> Element {
        let mut root = Element::new("manifest");
        if let Some(identifier) = &self.identifier {
            root.set_attr("identifier", identifier);
        }
        root.attributes.extend(self.attributes.iter().cloned());
        for binding in &self.namespaces {
            root.attributes
                .push(Attribute::new(binding.attribute_name(), binding.uri.clone()));
        }
        if !self.schema_locations.is_empty() {
            let value = self
                .schema_locations
                .iter()
                .map(|pair| format!("{} {}", pair.namespace, pair.location))
                .collect::<Vec<_>>()
                .join(" ");
            root.attributes
                .push(Attribute::new(format!("{}:schemaLocation", self.xsi_prefix()), value));
        }

        if let Some(metadata) = &self.metadata {
            root.children.push(Node::Element(metadata.clone()));
        }

        let mut organizations = Element::new("organizations");
        organizations.attributes = self.organizations_attributes.clone();
        for org in &self.organizations {
            let mut el = Element::new("organization");
            if let Some(identifier) = &org.identifier {
                el.set_attr("identifier", identifier);
            }
            el.attributes.extend(org.attributes.iter().cloned());
            if let Some(title) = &org.title {
                el.children
                    .push(Node::Element(Element::new("title").with_text(title.clone())));
            }
            for root_item in &org.roots {
                el.children.push(Node::Element(self.item_element(*root_item)));
            }
            el.children
                .extend(org.extensions.iter().cloned().map(Node::Element));
            organizations.children.push(Node::Element(el));
        }
        root.children.push(Node::Element(organizations));

        let mut resources = Element::new("resources");
        resources.attributes = self.resources_attributes.clone();
        for resource in &self.resources {
            resources
                .children
                .push(Node::Element(resource_element(resource)));
        }
        root.children.push(Node::Element(resources));

        root.children
            .extend(self.extensions.iter().cloned().map(Node::Element));
        root
    }

    fn item_element(&self, id: ItemId) -> Element {
        let item = self.item(id);
        let mut el = Element::new("item");
        if let Some(identifier) = &item.identifier {
            el.set_attr("identifier", identifier);
        }
        if let Some(reference) = &item.identifierref {
            el.set_attr("identifierref", reference);
        }
        el.attributes.extend(item.attributes.iter().cloned());
        if let Some(title) = &item.title {
            el.children
                .push(Node::Element(Element::new("title").with_text(title.clone())));
        }
        for child in &item.children {
            el.children.push(Node::Element(self.item_element(*child)));
        }
        el.children
            .extend(item.extensions.iter().cloned().map(Node::Element));
        el
    }

    fn xsi_prefix(&self) -> &str {
        self.namespaces
            .iter()
            .find(|binding| binding.uri == XSI_NAMESPACE)
            .and_then(|binding| binding.prefix.as_deref())
            .unwrap_or("xsi")
    }
}

fn parse_schema_locations(value: &str) -> Vec<SchemaLocation> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    tokens
        .chunks(2)
        .filter(|pair| pair.len() == 2)
        .map(|pair| SchemaLocation {
            namespace: pair[0].to_string(),
            location: pair[1].to_string(),
        })
        .collect()
}

fn parse_resource(el: &Element) -> Result<Resource, CartridgeError> {
    let identifier = el
        .attr("identifier")
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CartridgeError::Structural("resource without identifier".into()))?;
    let mut resource = Resource {
        identifier: identifier.to_string(),
        resource_type: el.attr("type").unwrap_or_default().to_string(),
        href: el.attr("href").map(str::to_string),
        files: Vec::new(),
        dependencies: Vec::new(),
        attributes: without(&el.attributes, &["identifier", "type", "href"]),
        extensions: Vec::new(),
        namespace: el.kind,
    };
    for child in el.elements() {
        match (child.local_name(), child.attr("href"), child.attr("identifierref")) {
            ("file", Some(href), _) => resource.files.push(href.to_string()),
            ("dependency", _, Some(target)) => resource.dependencies.push(target.to_string()),
            ("file", None, _) | ("dependency", _, None) => {}
            _ => resource.extensions.push(child.clone()),
        }
    }
    metadata_first(&mut resource.extensions);
    Ok(resource)
}

fn resource_element(resource: &Resource) -> Element {
    let mut el = Element::new("resource");
    el.set_attr("identifier", &resource.identifier);
    el.set_attr("type", &resource.resource_type);
    if let Some(href) = &resource.href {
        el.set_attr("href", href);
    }
    el.attributes.extend(resource.attributes.iter().cloned());

    let (metadata, rest): (Vec<&Element>, Vec<&Element>) = resource
        .extensions
        .iter()
        .partition(|ext| ext.local_name() == "metadata");
    el.children
        .extend(metadata.into_iter().cloned().map(Node::Element));
    for file in &resource.files {
        el.children
            .push(Node::Element(Element::new("file").with_attribute("href", file)));
    }
    for dependency in &resource.dependencies {
        el.children.push(Node::Element(
            Element::new("dependency").with_attribute("identifierref", dependency),
        ));
    }
    el.children.extend(rest.into_iter().cloned().map(Node::Element));
    el
}

fn split_title(el: &Element) -> (Option<String>, Vec<Element>) {
    let mut title = None;
    let mut extensions = Vec::new();
    for child in el.elements() {
        match child.local_name() {
            "title" if title.is_none() => title = Some(child.text_content()),
            "item" => {}
            _ => extensions.push(child.clone()),
        }
    }
    metadata_first(&mut extensions);
    (title, extensions)
}

fn metadata_first(extensions: &mut [Element]) {
    extensions.sort_by_key(|ext| ext.local_name() != "metadata");
}

fn without(attributes: &[Attribute], names: &[&str]) -> Vec<Attribute> {
    attributes
        .iter()
        .filter(|attr| !names.contains(&attr.name.as_str()))
        .cloned()
        .collect()
}
