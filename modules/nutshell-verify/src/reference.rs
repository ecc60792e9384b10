// Reference detection: which cited URLs point at a document we know how to read.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// arXiv abstract or PDF, identified by paper id (e.g. "2402.00001v2").
    Arxiv { id: String },
    /// GitHub repository; its README is the reference document.
    Github { owner: String, repo: String },
    Unsupported,
}

/// A cited URL together with what it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub url: String,
    pub kind: ReferenceKind,
}

impl Reference {
    /// The URL actually fetched for this reference.
    pub fn fetch_url(&self) -> Option<String> {
        match &self.kind {
            ReferenceKind::Arxiv { id } => Some(format!("https://arxiv.org/abs/{id}")),
            ReferenceKind::Github { owner, repo } => Some(format!(
                "https://raw.githubusercontent.com/{owner}/{repo}/HEAD/README.md"
            )),
            ReferenceKind::Unsupported => None,
        }
    }
}

/// Classify a URL from the string alone (no HTTP).
pub fn classify_reference(raw: &str) -> ReferenceKind {
    let Ok(url) = Url::parse(raw.trim()) else {
        return ReferenceKind::Unsupported;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return ReferenceKind::Unsupported;
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match host {
        "arxiv.org" | "export.arxiv.org" => arxiv_id(&segments)
            .map(|id| ReferenceKind::Arxiv { id })
            .unwrap_or(ReferenceKind::Unsupported),
        "github.com" => match segments.as_slice() {
            [owner, repo, ..] => ReferenceKind::Github {
                owner: owner.to_string(),
                repo: repo.trim_end_matches(".git").to_string(),
            },
            _ => ReferenceKind::Unsupported,
        },
        _ => ReferenceKind::Unsupported,
    }
}

fn arxiv_id(segments: &[&str]) -> Option<String> {
    let (kind, rest) = segments.split_first()?;
    if !matches!(*kind, "abs" | "pdf") || rest.is_empty() {
        return None;
    }
    // Old-style ids carry an archive prefix: /abs/cs/0112017
    let id = rest.join("/");
    let id = id.trim_end_matches(".pdf");
    (!id.is_empty()).then(|| id.to_string())
}

/// Supported references among `urls`, in order, one per fetched document.
pub fn supported_references(urls: &[String]) -> Vec<Reference> {
    let mut refs: Vec<Reference> = Vec::new();
    for url in urls {
        let reference = Reference {
            url: url.clone(),
            kind: classify_reference(url),
        };
        let Some(fetch_url) = reference.fetch_url() else {
            continue;
        };
        if refs.iter().any(|r| r.fetch_url().as_deref() == Some(fetch_url.as_str())) {
            continue;
        }
        refs.push(reference);
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arxiv_abstract_and_pdf_resolve_to_the_abstract_page() {
        let abs = classify_reference("https://arxiv.org/abs/2402.00001");
        let pdf = classify_reference("http://www.arxiv.org/pdf/2402.00001v2.pdf");
        assert_eq!(abs, ReferenceKind::Arxiv { id: "2402.00001".into() });
        assert_eq!(pdf, ReferenceKind::Arxiv { id: "2402.00001v2".into() });

        let reference = Reference {
            url: "https://arxiv.org/pdf/2402.00001v2.pdf".into(),
            kind: pdf,
        };
        assert_eq!(
            reference.fetch_url().as_deref(),
            Some("https://arxiv.org/abs/2402.00001v2")
        );
        assert_eq!(
            classify_reference("https://arxiv.org/abs/cs/0112017"),
            ReferenceKind::Arxiv { id: "cs/0112017".into() }
        );
    }

    #[test]
    fn github_repo_resolves_to_readme() {
        let kind = classify_reference("https://github.com/acme/model-x.git");
        assert_eq!(
            kind,
            ReferenceKind::Github {
                owner: "acme".into(),
                repo: "model-x".into()
            }
        );
        let deep = classify_reference("https://github.com/acme/model-x/tree/main/eval");
        assert!(matches!(deep, ReferenceKind::Github { ref repo, .. } if repo == "model-x"));
    }

    #[test]
    fn everything_else_is_unsupported() {
        for url in [
            "https://acme.ai/blog/model-x",
            "https://github.com/acme",
            "https://arxiv.org/list/cs.CL/recent",
            "ftp://arxiv.org/abs/2402.00001",
            "not a url",
        ] {
            assert_eq!(classify_reference(url), ReferenceKind::Unsupported, "{url}");
        }
    }

    #[test]
    fn supported_references_skip_unsupported_and_duplicates() {
        let urls = vec![
            "https://acme.ai/blog".to_string(),
            "https://arxiv.org/abs/2402.00001".to_string(),
            "https://arxiv.org/pdf/2402.00001.pdf".to_string(),
            "https://github.com/acme/model-x".to_string(),
        ];
        let refs = supported_references(&urls);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "https://arxiv.org/abs/2402.00001");
        assert_eq!(refs[1].url, "https://github.com/acme/model-x");
    }
}
