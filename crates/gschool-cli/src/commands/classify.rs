/// URL classification, block decisions and policy resolution
use anyhow::Result;
use gschool_core::{ClassifyRequest, ControlPlane, PolicyRequest};
use std::path::Path;

use super::helpers::{print_json, read_file, yes_no};

fn request(url: String, html_file: Option<&Path>) -> Result<ClassifyRequest> {
    let html = html_file.map(read_file).transpose()?;
    Ok(ClassifyRequest { url, html })
}

pub async fn handle_classify(
    plane: &ControlPlane,
    url: String,
    html_file: Option<&Path>,
    json: bool,
) -> Result<()> {
    let response = plane.classify(&request(url, html_file)?).await;
    if json {
        return print_json(&response);
    }
    println!("URL:        {}", response.url);
    println!("Host:       {}", response.result.host);
    println!("Domain:     {}", response.result.domain);
    println!("Category:   {}", response.result.category);
    println!("Confidence: {:.2}", response.result.confidence);
    Ok(())
}

pub async fn handle_decide(
    plane: &ControlPlane,
    url: String,
    html_file: Option<&Path>,
    json: bool,
) -> Result<()> {
    let decision = plane.decide(&request(url, html_file)?).await?;
    if json {
        return print_json(&decision);
    }
    println!("{} ({})", decision.url, decision.result.category);
    println!("Blocked: {}", yes_no(decision.blocked));
    if decision.blocked {
        println!("Redirect: {}", decision.block_url);
    }
    Ok(())
}

pub fn handle_policy(plane: &ControlPlane, student: String) -> Result<()> {
    let policy = plane.policy(&PolicyRequest { student })?;
    print_json(&policy)
}
