//! Parses the Hydra/RDFS/OWL schema graph into raw class and property facts.
//!
//! Grounded on the graph-query idiom of the OWL ontology reader this crate
//! descends from: open the input with the `sophia` Turtle parser into a
//! [`FastGraph`], build ad-hoc `Namespace`s for vocabularies sophia doesn't
//! ship term constants for, and walk `triples_matching` queries rather than
//! hand-rolled triple iteration.

use std::collections::BTreeSet;
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use sophia::api::graph::Graph;
use sophia::api::ns::{rdf, rdfs, Namespace};
use sophia::api::prelude::*;
use sophia::api::term::SimpleTerm;
use sophia::inmem::graph::FastGraph;
use sophia::turtle::parser::turtle;
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};

const HYDRA_NS: &str = "http://www.w3.org/ns/hydra/core#";
const OWL_NS: &str = "http://www.w3.org/2002/07/owl#";

/// Raw facts about one supported property, merged across every class that
/// supports it (a property is schema-level, shared state; see C4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyFact {
    pub iri: String,
    pub is_required: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub domains: BTreeSet<String>,
    pub ranges: BTreeSet<String>,
    pub declared_object_property: bool,
    pub declared_datatype_property: bool,
}

/// Raw facts about one Hydra class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassFact {
    pub iri: String,
    pub super_classes: BTreeSet<String>,
    pub supported_property_iris: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaGraphFacts {
    pub classes: std::collections::BTreeMap<String, ClassFact>,
    pub properties: std::collections::BTreeMap<String, PropertyFact>,
}

fn get_iri_value<T: Term>(graph: &FastGraph, subject: &SimpleTerm, predicate: T) -> Option<String> {
    graph
        .triples_matching([subject], [predicate], Any)
        .filter_map(Result::ok)
        .filter_map(|t| match t.o() {
            SimpleTerm::Iri(iri) => Some(iri.to_string()),
            _ => None,
        })
        .next()
}

fn get_iri_values<T: Term>(graph: &FastGraph, subject: &SimpleTerm, predicate: T) -> Vec<String> {
    graph
        .triples_matching([subject], [predicate], Any)
        .filter_map(Result::ok)
        .filter_map(|t| match t.o() {
            SimpleTerm::Iri(iri) => Some(iri.to_string()),
            _ => None,
        })
        .collect()
}

fn get_bool_value<T: Term>(graph: &FastGraph, subject: &SimpleTerm, predicate: T) -> bool {
    graph
        .triples_matching([subject], [predicate], Any)
        .filter_map(Result::ok)
        .filter_map(|t| match t.o() {
            SimpleTerm::LiteralDatatype(lit, _) => Some(lit.to_string()),
            _ => None,
        })
        .next()
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false)
}

fn has_type(graph: &FastGraph, subject: &SimpleTerm, type_iri: &SimpleTerm) -> bool {
    graph
        .triples_matching([subject], [rdf::type_], [type_iri])
        .next()
        .is_some()
}

/// Parses a Turtle-serialised schema graph into [`SchemaGraphFacts`].
pub fn parse_schema_graph<R: BufRead>(reader: R) -> SchemaResult<SchemaGraphFacts> {
    let graph: FastGraph = turtle::parse_bufread(reader)
        .collect_triples()
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?;

    let hydra = Namespace::new_unchecked(HYDRA_NS);
    let owl = Namespace::new_unchecked(OWL_NS);

    let hydra_class: SimpleTerm = hydra
        .get("Class")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let hydra_supported_property: SimpleTerm = hydra
        .get("supportedProperty")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let hydra_property: SimpleTerm = hydra
        .get("property")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let hydra_required: SimpleTerm = hydra
        .get("required")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let hydra_readonly: SimpleTerm = hydra
        .get("readonly")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let hydra_writeonly: SimpleTerm = hydra
        .get("writeonly")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let owl_object_property: SimpleTerm = owl
        .get("ObjectProperty")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();
    let owl_datatype_property: SimpleTerm = owl
        .get("DatatypeProperty")
        .map_err(|e| SchemaError::GraphParse(e.to_string()))?
        .into_term();

    let mut facts = SchemaGraphFacts::default();

    let class_subjects: Vec<SimpleTerm> = graph
        .triples_matching(Any, [rdf::type_], [&hydra_class])
        .filter_map(Result::ok)
        .map(|t| t.s().to_owned())
        .collect();

    for class_term in class_subjects {
        let class_iri = match &class_term {
            SimpleTerm::Iri(iri) => iri.to_string(),
            _ => continue,
        };

        let super_classes = get_iri_values(&graph, &class_term, rdfs::subClassOf)
            .into_iter()
            .collect::<BTreeSet<_>>();

        let supported_property_nodes: Vec<SimpleTerm> = graph
            .triples_matching([&class_term], [&hydra_supported_property], Any)
            .filter_map(Result::ok)
            .map(|t| t.o().to_owned())
            .collect();

        let mut supported_property_iris = Vec::new();
        for sp_node in supported_property_nodes {
            let Some(property_iri) = get_iri_value(&graph, &sp_node, &hydra_property) else {
                continue;
            };
            let is_required = get_bool_value(&graph, &sp_node, &hydra_required);
            let read_only = get_bool_value(&graph, &sp_node, &hydra_readonly);
            let write_only = get_bool_value(&graph, &sp_node, &hydra_writeonly);

            let property_term = SimpleTerm::Iri(
                sophia::api::term::IriRef::new_unchecked(property_iri.clone().into()),
            );
            let domains = get_iri_values(&graph, &property_term, rdfs::domain)
                .into_iter()
                .collect::<BTreeSet<_>>();
            let ranges = get_iri_values(&graph, &property_term, rdfs::range)
                .into_iter()
                .collect::<BTreeSet<_>>();
            let declared_object_property = has_type(&graph, &property_term, &owl_object_property);
            let declared_datatype_property =
                has_type(&graph, &property_term, &owl_datatype_property);

            let entry = facts
                .properties
                .entry(property_iri.clone())
                .or_insert_with(|| PropertyFact {
                    iri: property_iri.clone(),
                    ..Default::default()
                });
            entry.is_required |= is_required;
            entry.read_only |= read_only;
            entry.write_only |= write_only;
            entry.domains.extend(domains);
            entry.ranges.extend(ranges);
            entry.declared_object_property |= declared_object_property;
            entry.declared_datatype_property |= declared_datatype_property;

            supported_property_iris.push(property_iri);
        }

        debug!(class = %class_iri, properties = supported_property_iris.len(), "parsed Hydra class");

        facts.classes.insert(
            class_iri.clone(),
            ClassFact {
                iri: class_iri,
                super_classes,
                supported_property_iris,
            },
        );
    }

    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
        @prefix hydra: <http://www.w3.org/ns/hydra/core#> .
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .
        @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
        @prefix ex: <http://example.org/reference#> .

        ex:Person a hydra:Class ;
            hydra:supportedProperty [
                hydra:property ex:name ;
                hydra:required true
            ], [
                hydra:property ex:mbox ;
                hydra:required true
            ] .

        ex:name a owl:DatatypeProperty ;
            rdfs:range xsd:string .

        ex:mbox a owl:DatatypeProperty ;
            rdfs:range xsd:string .

        ex:LocalPerson a hydra:Class ;
            rdfs:subClassOf ex:Person .
    "#;

    #[test]
    fn parses_classes_and_merges_property_facts() {
        let facts = parse_schema_graph(FIXTURE.as_bytes()).unwrap();
        assert_eq!(facts.classes.len(), 2);
        let person = &facts.classes["http://example.org/reference#Person"];
        assert_eq!(person.supported_property_iris.len(), 2);

        let local_person = &facts.classes["http://example.org/reference#LocalPerson"];
        assert!(local_person
            .super_classes
            .contains("http://example.org/reference#Person"));

        let name_prop = &facts.properties["http://example.org/reference#name"];
        assert!(name_prop.is_required);
        assert!(name_prop.declared_datatype_property);
        assert!(name_prop
            .ranges
            .contains("http://www.w3.org/2001/XMLSchema#string"));
    }
}
