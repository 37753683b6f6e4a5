use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// anything that can be rendered as a cloudformation resource.
pub trait CfnResource {
    fn type_string(&self) -> &'static str;
    fn properties(&self) -> Value;
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

pub struct Resource {
    pub name: String,
    pub properties: Box<dyn CfnResource>,
    /// explicit ordering edges. Anything referenced via Ref/GetAtt/Sub
    /// is already ordered by cloudformation and doesn't need to be listed.
    pub depends_on: Vec<String>,
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new<S: Into<String>>(name: S, properties: impl CfnResource + 'static) -> Self {
        Self {
            name: name.into(),
            properties: Box::new(properties),
            depends_on: vec![],
            deletion_policy: None,
        }
    }

    pub fn depends_on<S: Into<String>>(mut self, logical_id: S) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Metadata", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, TemplateParameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

impl Default for SavedTemplate {
    fn default() -> Self {
        Self {
            version: "2010-09-09".to_string(),
            description: Default::default(),
            metadata: Default::default(),
            parameters: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl SavedTemplate {
    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a SavedResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// the declared contents of one stack before validation.
#[derive(Default)]
pub struct StackInput {
    pub stack_name: String,
    pub description: String,
    pub resources: Vec<Resource>,
    pub parameters: BTreeMap<String, TemplateParameter>,
    pub outputs: BTreeMap<String, ResourceOutput>,
    pub metadata: BTreeMap<String, Value>,
}

impl StackInput {
    pub fn new<S: Into<String>>(stack_name: S) -> Self {
        Self {
            stack_name: stack_name.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn add_parameter(&mut self, name: &str, description: &str) {
        self.parameters.insert(name.to_string(), TemplateParameter {
            ty: "String".to_string(),
            description: description.to_string(),
        });
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.insert(name.to_string(), ResourceOutput {
            description: description.to_string(),
            value,
        });
    }

    /// validates every resource and every reference between them, and
    /// produces the template that gets handed to cloudformation.
    pub fn to_template(&self) -> Result<SavedTemplate> {
        validate_stack_name(&self.stack_name)?;
        let mut out_template = validate_resources_to_template(&self.resources)?;
        out_template.description = self.description.clone();
        out_template.parameters = self.parameters.clone();
        out_template.outputs = self.outputs.clone();
        out_template.metadata = self.metadata.clone();

        let declared: BTreeSet<&str> = out_template.resources.keys()
            .map(|s| s.as_str())
            .chain(out_template.parameters.keys().map(|s| s.as_str()))
            .collect();
        for (name, output) in out_template.outputs.iter() {
            for target in collect_references(&output.value) {
                if !declared.contains(target.as_str()) {
                    return Err(Error::UnresolvedReference { resource: format!("Outputs.{name}"), target });
                }
            }
        }
        let graph = dependency_graph(&out_template, &declared)?;
        check_for_cycles(&graph)?;
        debug!(stack = %self.stack_name, resources = out_template.resources.len(), "validated stack template");
        Ok(out_template)
    }
}

fn validate_resources_to_template(resources: &[Resource]) -> Result<SavedTemplate> {
    let mut out_template = SavedTemplate::default();
    for resource in resources.iter() {
        if let Some(reason) = verify_resource_name(&resource.name) {
            return Err(Error::InvalidResource { resource: resource.name.clone(), reason });
        }
        if let Err(reason) = resource.properties.validate() {
            return Err(Error::InvalidResource { resource: resource.name.clone(), reason });
        }
        let saved_resource = SavedResource {
            ty: resource.properties.type_string().to_string(),
            properties: resource.properties.properties(),
            depends_on: resource.depends_on.clone(),
            deletion_policy: resource.deletion_policy,
            update_replace_policy: resource.deletion_policy,
        };
        if out_template.resources.insert(resource.name.clone(), saved_resource).is_some() {
            return Err(Error::DuplicateResource(resource.name.clone()));
        }
    }
    Ok(out_template)
}

/// edges from each resource to every other resource it needs to exist first.
fn dependency_graph(template: &SavedTemplate, declared: &BTreeSet<&str>) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut graph = BTreeMap::new();
    for (name, resource) in template.resources.iter() {
        let mut edges = BTreeSet::new();
        let referenced = collect_references(&resource.properties);
        for target in referenced.into_iter().chain(resource.depends_on.iter().cloned()) {
            if !declared.contains(target.as_str()) {
                return Err(Error::UnresolvedReference { resource: name.clone(), target });
            }
            // parameters are not part of the ordering graph
            if template.resources.contains_key(&target) {
                edges.insert(target);
            }
        }
        graph.insert(name.clone(), edges);
    }
    Ok(graph)
}

fn check_for_cycles(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark { Visiting, Done }

    fn visit<'a>(
        node: &'a str,
        graph: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Err(Error::DependencyCycle(cycle));
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        path.push(node);
        if let Some(edges) = graph.get(node) {
            for next in edges {
                visit(next, graph, marks, path)?;
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    for node in graph.keys() {
        let mut path = vec![];
        visit(node, graph, &mut marks, &mut path)?;
    }
    Ok(())
}

/// every logical id referenced through Ref, Fn::GetAtt or Fn::Sub.
/// pseudo parameters (AWS::Region etc) are skipped.
pub fn collect_references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_references_inner(value, &mut out);
    out.retain(|r| !r.starts_with("AWS::"));
    out
}

fn collect_references_inner(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    out.insert(target.clone());
                    return;
                }
                if let Some(att) = map.get("Fn::GetAtt") {
                    match att {
                        Value::Array(parts) => {
                            if let Some(Value::String(target)) = parts.first() {
                                out.insert(target.clone());
                            }
                        }
                        Value::String(s) => {
                            if let Some((target, _)) = s.split_once('.') {
                                out.insert(target.to_string());
                            }
                        }
                        _ => {}
                    }
                    return;
                }
                if let Some(sub) = map.get("Fn::Sub") {
                    match sub {
                        Value::String(s) => sub_references(s, &Map::new(), out),
                        Value::Array(parts) => {
                            let empty = Map::new();
                            let vars = match parts.get(1) {
                                Some(Value::Object(vars)) => vars,
                                _ => &empty,
                            };
                            if let Some(Value::String(s)) = parts.first() {
                                sub_references(s, vars, out);
                            }
                            for var in vars.values() {
                                collect_references_inner(var, out);
                            }
                        }
                        _ => {}
                    }
                    return;
                }
            }
            for v in map.values() {
                collect_references_inner(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references_inner(v, out);
            }
        }
        _ => {}
    }
}

fn sub_references(s: &str, vars: &Map<String, Value>, out: &mut BTreeSet<String>) {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let end = match after.find('}') {
            Some(e) => e,
            None => return,
        };
        let token = &after[..end];
        // ${!Literal} is an escaped, literal string
        if !token.starts_with('!') {
            let target = token.split('.').next().unwrap_or(token);
            if !vars.contains_key(target) {
                out.insert(target.to_string());
            }
        }
        rest = &after[end + 1..];
    }
}

pub fn verify_resource_name(resource_name: &str) -> Option<String> {
    if resource_name.len() > 255 {
        return Some(format!("Invalid resource name {:?}\nmust be less than 255 characters", resource_name));
    }
    if resource_name.is_empty() {
        return Some(format!("Invalid resource name {:?}\nMust contain at least 1 character", resource_name));
    }
    if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(format!("Invalid resource name {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", resource_name));
    }
    None
}

pub fn validate_stack_name(stack_name: &str) -> Result<()> {
    // A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
    // It must start with an alphabetical character and can't be longer than 128 characters.
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let invalid = || Error::InvalidStackName {
        name: stack_name.to_string(),
        restriction: restriction.to_string(),
    };
    match stack_name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(invalid()),
    }
    if stack_name.chars().any(|c| !c.is_ascii_alphanumeric() && c != '-') {
        return Err(invalid());
    }
    if stack_name.len() > 128 {
        return Err(invalid());
    }
    Ok(())
}

pub fn get_ref(logical_id: &str) -> Value {
    let mut map = Map::new();
    map.insert("Ref".to_string(), Value::String(logical_id.to_string()));
    Value::Object(map)
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    let mut map = Map::new();
    map.insert("Fn::GetAtt".to_string(), Value::Array(vec![
        Value::String(logical_id.to_string()),
        Value::String(attribute.to_string()),
    ]));
    Value::Object(map)
}

pub fn sub(template: &str) -> Value {
    let mut map = Map::new();
    map.insert("Fn::Sub".to_string(), Value::String(template.to_string()));
    Value::Object(map)
}

/// strips the scheme from a bucket's WebsiteURL:
/// { "Fn::Select" : [ "2", { "Fn::Split": ["/", { "Fn::GetAtt": [bucket, "WebsiteURL"] }] } ] }
pub fn select_s3website_url(logical_bucket: &str) -> Value {
    let mut split = Map::new();
    split.insert("Fn::Split".to_string(), Value::Array(vec![
        Value::String("/".to_string()),
        get_att(logical_bucket, "WebsiteURL"),
    ]));
    let mut select = Map::new();
    select.insert("Fn::Select".to_string(), Value::Array(vec![
        Value::String("2".to_string()),
        Value::Object(split),
    ]));
    Value::Object(select)
}

/// each statement is (effect, actions, resource, principal).
/// an empty principal is left out, which is what identity policies need.
pub fn create_policy_doc(statements: &[(&str, &[&str], Value, &str)]) -> Value {
    let mut statements_out = vec![];
    for (effect, actions, resource, principal) in statements {
        let mut statement = Map::new();
        statement.insert("Effect".to_string(), Value::String(effect.to_string()));
        let actions = actions.iter().map(|a| Value::String(a.to_string())).collect();
        statement.insert("Action".to_string(), Value::Array(actions));
        statement.insert("Resource".to_string(), resource.clone());
        if !principal.is_empty() {
            statement.insert("Principal".to_string(), Value::String(principal.to_string()));
        }
        statements_out.push(Value::Object(statement));
    }
    let mut map = Map::new();
    map.insert("Version".to_string(), Value::String("2012-10-17".to_string()));
    map.insert("Statement".to_string(), Value::Array(statements_out));
    Value::Object(map)
}

pub fn create_assume_role_policy_doc(service: &str) -> Value {
    let mut principal = Map::new();
    principal.insert("Service".to_string(), Value::String(service.to_string()));

    let mut statement_obj = Map::new();
    statement_obj.insert("Effect".to_string(), Value::String("Allow".to_string()));
    statement_obj.insert("Principal".to_string(), Value::Object(principal));
    statement_obj.insert("Action".to_string(), Value::String("sts:AssumeRole".to_string()));

    let mut map = Map::new();
    map.insert("Version".to_string(), Value::String("2012-10-17".to_string()));
    map.insert("Statement".to_string(), Value::Array(vec![Value::Object(statement_obj)]));
    Value::Object(map)
}

pub fn aws_managed_policy_arn(name: &str) -> Value {
    sub(&format!("arn:${{AWS::Partition}}:iam::aws:policy/{name}"))
}

/// a resource whose properties are a raw json object. Used for the
/// handful of resource types that need no typed input.
pub struct RawResource {
    pub ty: &'static str,
    pub properties: Value,
}

impl CfnResource for RawResource {
    fn type_string(&self) -> &'static str {
        self.ty
    }
    fn properties(&self) -> Value {
        self.properties.clone()
    }
}
